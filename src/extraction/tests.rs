use super::*;

fn approval_flowchart() -> Flowchart {
    Flowchart {
        title: "Figure 1. Approval Flow".to_string(),
        nodes: vec![
            FlowchartNode {
                id: "n1".to_string(),
                label: "Submit request".to_string(),
                shape: "rectangle".to_string(),
            },
            FlowchartNode {
                id: "n2".to_string(),
                label: "Data in database?".to_string(),
                shape: "diamond".to_string(),
            },
            FlowchartNode {
                id: "n3".to_string(),
                label: "Show error".to_string(),
                shape: "rectangle".to_string(),
            },
        ],
        edges: vec![
            FlowchartEdge {
                from_node: "n1".to_string(),
                to_node: "n2".to_string(),
                label: None,
            },
            FlowchartEdge {
                from_node: "n2".to_string(),
                to_node: "n3".to_string(),
                label: Some("No".to_string()),
            },
        ],
        explanation: "Requests are checked against the database.".to_string(),
    }
}

#[test]
fn element_type_round_trips_through_strings() {
    assert_eq!(ElementType::Text.to_string(), "TEXT");
    assert_eq!(ElementType::Flowchart.to_string(), "FLOWCHART");
    assert_eq!("FLOWCHART".parse::<ElementType>(), Ok(ElementType::Flowchart));
    assert_eq!(
        "TABLE".parse::<ElementType>(),
        Err(UnsupportedElementType("TABLE".to_string()))
    );
}

#[test]
fn element_ids_are_deterministic() {
    assert_eq!(
        element_id("Manual_1A2B3C4D", 3, ElementType::Flowchart),
        "Manual_1A2B3C4D_page_3_FLOWCHART"
    );
}

#[test]
fn flowchart_plain_text_uses_node_labels() {
    let text = approval_flowchart().plain_text();

    assert!(text.starts_with("Flowchart: Figure 1. Approval Flow"));
    assert!(text.contains("Requests are checked against the database."));
    assert!(text.contains("Steps: Submit request; Data in database?; Show error"));
    assert!(text.contains("Submit request -> Data in database?"));
    assert!(text.contains("Data in database? -> Show error (No)"));
}

#[test]
fn edges_to_unknown_nodes_fall_back_to_ids() {
    let mut flowchart = approval_flowchart();
    flowchart.edges.push(FlowchartEdge {
        from_node: "n3".to_string(),
        to_node: "n9".to_string(),
        label: Some("  ".to_string()),
    });

    assert!(flowchart.plain_text().ends_with("Show error -> n9"));
}

#[test]
fn analysis_becomes_text_and_flowchart_elements() {
    let analysis = PageAnalysis {
        page_number: "4".to_string(),
        extracted_text: Some(ExtractedText {
            all_text: "The system validates input.".to_string(),
            explanation: "Body page describing validation.".to_string(),
        }),
        flowchart: Some(approval_flowchart()),
    };

    let elements = analysis.into_elements("Spec_00FF00FF", 4);
    assert_eq!(elements.len(), 2);

    let text = &elements[0];
    assert_eq!(text.element_type, ElementType::Text);
    assert_eq!(text.element_id, "Spec_00FF00FF_page_4_TEXT");
    assert_eq!(
        text.plain_text,
        "The system validates input.\n\nBody page describing validation."
    );
    assert_eq!(text.content["all_text"], "The system validates input.");

    let flowchart = &elements[1];
    assert_eq!(flowchart.element_type, ElementType::Flowchart);
    assert_eq!(flowchart.page_number, 4);
    assert_eq!(flowchart.content["nodes"].as_array().map(Vec::len), Some(3));
}

#[test]
fn empty_blocks_are_skipped() {
    let analysis = PageAnalysis {
        page_number: "cover".to_string(),
        extracted_text: Some(ExtractedText {
            all_text: "   ".to_string(),
            explanation: String::new(),
        }),
        flowchart: Some(Flowchart {
            title: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            explanation: String::new(),
        }),
    };

    assert!(analysis.into_elements("Doc_12345678", 1).is_empty());
}

#[test]
fn analysis_parses_model_output_without_flowchart() {
    let raw = r#"{
        "page_number": "ii",
        "extracted_text": {"all_text": "Table of contents", "explanation": "Contents page"}
    }"#;

    let analysis: PageAnalysis = serde_json::from_str(raw).expect("should parse analysis");
    assert_eq!(analysis.page_number, "ii");
    assert!(analysis.flowchart.is_none());
    assert_eq!(analysis.into_elements("Doc_12345678", 2).len(), 1);
}

#[test]
fn schema_requires_page_number_and_text() {
    let schema = page_analysis_schema();
    let required = schema["required"].as_array().expect("required list");
    assert!(required.iter().any(|v| v == "page_number"));
    assert!(required.iter().any(|v| v == "extracted_text"));
    assert!(!required.iter().any(|v| v == "flowchart"));
}
