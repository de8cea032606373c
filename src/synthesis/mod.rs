// Answer synthesis
// Builds the grounded prompt from ranked evidence and asks the generator for an answer


use itertools::Itertools;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::generation::TextGenerator;
use crate::retrieval::Evidence;

pub const NO_EVIDENCE_ANSWER: &str =
    "I could not find information relevant to this question in the document.";

pub const GENERATION_UNAVAILABLE_ANSWER: &str =
    "The answer service is currently unavailable. Please try again later.";

const PROMPT_PREAMBLE: &str = "Answer the question using only the document excerpts below. \
Cite page numbers for the facts you use. If the excerpts do not contain the answer, say so.";

/// How an answer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Generated,
    NoEvidence,
    GenerationUnavailable,
    /// The question could not be embedded, so nothing was retrieved
    EmbeddingUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesizedAnswer {
    pub text: String,
    pub outcome: AnswerOutcome,
}

impl SynthesizedAnswer {
    /// Degraded answer for a question that could not be embedded
    #[inline]
    pub fn embedding_unavailable() -> Self {
        Self {
            text: GENERATION_UNAVAILABLE_ANSWER.to_string(),
            outcome: AnswerOutcome::EmbeddingUnavailable,
        }
    }
}

/// Render evidence grouped by page, pages in order of first appearance
#[inline]
pub fn build_prompt(question: &str, evidence: &[Evidence]) -> String {
    let mut prompt = String::from(PROMPT_PREAMBLE);
    prompt.push_str("\n\n");

    for page in evidence.iter().map(|item| item.page_number).unique() {
        let _ = writeln!(prompt, "--- Page {} ---", page);
        for item in evidence.iter().filter(|item| item.page_number == page) {
            let _ = writeln!(prompt, "[{}] {}", item.element_type, item.plain_text);
        }
        prompt.push('\n');
    }

    let _ = write!(prompt, "Question: {}\nAnswer:", question);
    prompt
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl AnswerSynthesizer {
    #[inline]
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    #[inline]
    pub fn synthesize(&self, question: &str, evidence: &[Evidence]) -> SynthesizedAnswer {
        if evidence.is_empty() {
            debug!("No evidence for question, skipping generation");
            return SynthesizedAnswer {
                text: NO_EVIDENCE_ANSWER.to_string(),
                outcome: AnswerOutcome::NoEvidence,
            };
        }

        let prompt = build_prompt(question, evidence);
        match self.generator.generate(&prompt) {
            Some(text) => SynthesizedAnswer {
                text,
                outcome: AnswerOutcome::Generated,
            },
            None => {
                warn!("Generator unavailable, returning degraded answer");
                SynthesizedAnswer {
                    text: GENERATION_UNAVAILABLE_ANSWER.to_string(),
                    outcome: AnswerOutcome::GenerationUnavailable,
                }
            }
        }
    }
}
