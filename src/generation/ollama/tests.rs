use super::*;
use tempfile::TempDir;

fn generator() -> OllamaGenerator {
    OllamaGenerator::new(&OllamaConfig::default(), &GenerationConfig::default())
        .expect("Failed to create generator")
}

#[test]
fn generator_uses_generation_model() {
    let generator = generator();
    assert_eq!(generator.model(), "gemma3:12b");
}

#[test]
fn plain_request_omits_images_and_format() {
    let request = GenerateRequest {
        model: "gemma3:12b",
        prompt: "Question?",
        stream: false,
        images: Vec::new(),
        format: None,
    };

    let json = serde_json::to_value(&request).expect("can serialize request");
    assert_eq!(json["stream"], false);
    assert!(json.get("images").is_none());
    assert!(json.get("format").is_none());
}

#[test]
fn analysis_request_carries_schema() {
    let request = GenerateRequest {
        model: "gemma3:12b",
        prompt: PAGE_ANALYSIS_PROMPT,
        stream: false,
        images: vec![STANDARD.encode(b"png")],
        format: Some(page_analysis_schema()),
    };

    let json = serde_json::to_value(&request).expect("can serialize request");
    assert_eq!(json["images"][0], "cG5n");
    assert_eq!(json["format"]["type"], "object");
}

#[test]
fn missing_image_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let missing = temp_dir.path().join("page_1.png");

    assert!(generator().analyze_image(&missing).is_err());
    assert!(generator().analyze_page(&missing).is_none());
}
