// Page analysis schema and conversion into indexable elements

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Kind of content an element was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementType {
    Text,
    Flowchart,
}

impl ElementType {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Text => "TEXT",
            ElementType::Flowchart => "FLOWCHART",
        }
    }
}

impl fmt::Display for ElementType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported element type: {0}")]
pub struct UnsupportedElementType(pub String);

impl FromStr for ElementType {
    type Err = UnsupportedElementType;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(ElementType::Text),
            "FLOWCHART" => Ok(ElementType::Flowchart),
            other => Err(UnsupportedElementType(other.to_string())),
        }
    }
}

/// One extracted unit of page content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub element_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub element_type: ElementType,
    /// Text used for embedding and display
    pub plain_text: String,
    /// Type-specific payload
    pub content: serde_json::Value,
}

/// Structured result of analysing one page image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAnalysis {
    /// Page label as printed on the page ("1", "ii", "cover")
    pub page_number: String,
    #[serde(default)]
    pub extracted_text: Option<ExtractedText>,
    #[serde(default)]
    pub flowchart: Option<Flowchart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub all_text: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flowchart {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub nodes: Vec<FlowchartNode>,
    #[serde(default)]
    pub edges: Vec<FlowchartEdge>,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowchartNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub shape: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowchartEdge {
    pub from_node: String,
    pub to_node: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Deterministic element identifier; a page holds at most one element per type
#[inline]
pub fn element_id(document_id: &str, page_number: u32, element_type: ElementType) -> String {
    format!("{}_page_{}_{}", document_id, page_number, element_type)
}

impl PageAnalysis {
    /// Convert the analysis into elements, skipping blocks without any text
    #[inline]
    pub fn into_elements(self, document_id: &str, page_number: u32) -> Vec<Element> {
        let mut elements = Vec::new();

        if let Some(text) = self.extracted_text {
            let plain_text = text.plain_text();
            if plain_text.is_empty() {
                warn!(
                    "Skipping empty text block on page {} of {}",
                    page_number, document_id
                );
            } else {
                elements.push(Element {
                    element_id: element_id(document_id, page_number, ElementType::Text),
                    document_id: document_id.to_string(),
                    page_number,
                    element_type: ElementType::Text,
                    plain_text,
                    content: json!({
                        "all_text": text.all_text,
                        "explanation": text.explanation,
                    }),
                });
            }
        }

        if let Some(flowchart) = self.flowchart {
            let plain_text = flowchart.plain_text();
            if plain_text.is_empty() {
                warn!(
                    "Skipping empty flowchart on page {} of {}",
                    page_number, document_id
                );
            } else {
                let content = serde_json::to_value(&flowchart).unwrap_or_else(|e| {
                    warn!("Failed to serialize flowchart payload: {}", e);
                    serde_json::Value::Null
                });
                elements.push(Element {
                    element_id: element_id(document_id, page_number, ElementType::Flowchart),
                    document_id: document_id.to_string(),
                    page_number,
                    element_type: ElementType::Flowchart,
                    plain_text,
                    content,
                });
            }
        }

        elements
    }
}

impl ExtractedText {
    #[inline]
    pub fn plain_text(&self) -> String {
        let parts = [self.all_text.trim(), self.explanation.trim()];
        parts
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Flowchart {
    /// Flatten the diagram into searchable prose: title, explanation, steps and transitions
    #[inline]
    pub fn plain_text(&self) -> String {
        let mut lines = Vec::new();

        if !self.title.trim().is_empty() {
            lines.push(format!("Flowchart: {}", self.title.trim()));
        }
        if !self.explanation.trim().is_empty() {
            lines.push(self.explanation.trim().to_string());
        }

        let steps: Vec<&str> = self
            .nodes
            .iter()
            .map(|node| node.label.trim())
            .filter(|label| !label.is_empty())
            .collect();
        if !steps.is_empty() {
            lines.push(format!("Steps: {}", steps.join("; ")));
        }

        for edge in &self.edges {
            let from = self.node_label(&edge.from_node);
            let to = self.node_label(&edge.to_node);
            match edge.label.as_deref().map(str::trim) {
                Some(label) if !label.is_empty() => {
                    lines.push(format!("{} -> {} ({})", from, to, label));
                }
                _ => lines.push(format!("{} -> {}", from, to)),
            }
        }

        lines.join("\n")
    }

    fn node_label<'a>(&'a self, id: &'a str) -> &'a str {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .map_or(id, |node| node.label.trim())
    }
}

/// JSON schema handed to the multimodal model for structured page analysis
#[inline]
pub fn page_analysis_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "page_number": {
                "type": "string",
                "description": "Page number printed on the page (e.g. \"1\", \"ii\"), or \"cover\" when none is visible"
            },
            "extracted_text": {
                "type": "object",
                "properties": {
                    "all_text": {
                        "type": "string",
                        "description": "All text content on the page joined into one string"
                    },
                    "explanation": {
                        "type": "string",
                        "description": "What the page is (cover, table of contents, body, appendix) and what it says"
                    }
                },
                "required": ["all_text", "explanation"]
            },
            "flowchart": {
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "nodes": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "label": { "type": "string" },
                                "shape": { "type": "string" }
                            },
                            "required": ["id", "label", "shape"]
                        }
                    },
                    "edges": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "from_node": { "type": "string" },
                                "to_node": { "type": "string" },
                                "label": { "type": "string" }
                            },
                            "required": ["from_node", "to_node"]
                        }
                    },
                    "explanation": { "type": "string" }
                },
                "required": ["title", "nodes", "edges", "explanation"]
            }
        },
        "required": ["page_number", "extracted_text"]
    })
}
