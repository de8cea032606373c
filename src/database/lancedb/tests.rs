use super::*;

#[test]
fn element_metadata_serializes_type_as_label() {
    let metadata = ElementMetadata {
        element_id: "Guide_AB12CD34_page_1_FLOWCHART".to_string(),
        document_id: "Guide_AB12CD34".to_string(),
        page_number: 1,
        element_type: ElementType::Flowchart,
    };

    let json = serde_json::to_value(&metadata).expect("can serialize json");
    assert_eq!(json["element_type"], "FLOWCHART");
    assert_eq!(json["page_number"], 1);

    let parsed: ElementMetadata = serde_json::from_value(json).expect("can parse json");
    assert_eq!(parsed, metadata);
}

#[test]
fn store_error_messages() {
    assert_eq!(
        StoreError::Corrupt("bad manifest".to_string()).to_string(),
        "vector index corrupted: bad manifest"
    );
    assert!(StoreError::Corrupt(String::new()).is_corruption());
    assert!(!StoreError::Backend(String::new()).is_corruption());
    assert!(!StoreError::Unrecoverable(String::new()).is_corruption());
}
