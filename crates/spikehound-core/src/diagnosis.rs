//! Root-cause diagnosis model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest confidence a diagnosis may carry
pub const MAX_CONFIDENCE: u8 = 100;

/// Proposed root cause with the lines of evidence that support it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub title: String,
    pub explanation: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Output of the diagnosis stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub hypothesis: Hypothesis,
    /// 0..=100
    pub confidence: u8,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

impl Diagnosis {
    /// Build a diagnosis, capping confidence at [`MAX_CONFIDENCE`]
    pub fn new(
        title: impl Into<String>,
        explanation: impl Into<String>,
        evidence: Vec<String>,
        confidence: u8,
    ) -> Self {
        Self {
            hypothesis: Hypothesis {
                title: title.into(),
                explanation: explanation.into(),
                evidence,
            },
            confidence: confidence.min(MAX_CONFIDENCE),
            alternatives: Vec::new(),
            risks: Vec::new(),
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_risks(mut self, risks: Vec<String>) -> Self {
        self.risks = risks;
        self
    }

    /// Check constraints serde cannot express (used on reasoning output)
    pub fn validate(&self) -> Result<()> {
        if self.hypothesis.title.trim().is_empty() {
            return Err(Error::invalid_response("diagnosis hypothesis has an empty title"));
        }
        if self.hypothesis.explanation.trim().is_empty() {
            return Err(Error::invalid_response("diagnosis hypothesis has an empty explanation"));
        }
        if self.confidence > MAX_CONFIDENCE {
            return Err(Error::invalid_response(format!(
                "diagnosis confidence {} is out of range 0..=100",
                self.confidence
            )));
        }
        Ok(())
    }

    /// Every human-readable string of the diagnosis, lowercased and joined.
    ///
    /// Remediation rules match phrases against this text.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.hypothesis.title, &self.hypothesis.explanation];
        parts.extend(self.hypothesis.evidence.iter().map(String::as_str));
        parts.extend(self.alternatives.iter().map(String::as_str));
        parts.extend(self.risks.iter().map(String::as_str));
        parts.join("\n").to_lowercase()
    }
}
