//! Structured clause extraction.
//!
//! Each clause is sent to the generation backend under a system instruction
//! that demands one raw JSON object with nine fixed fields. Output that does
//! not parse strictly goes through a defaulting pass instead of failing, so a
//! single malformed clause never aborts a document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

use super::generator::{GenerationRequest, Generator};
use super::types::Clause;
use crate::error::{RagError, Result};

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a precise legal contract analyst. You receive exactly one clause or section of a contract.
Return a single raw JSON object and nothing else: no explanations, no Markdown, no code fences.
Every field must always be present. When information is missing use null for duration, an empty string for text fields, an empty list for lists, and false for booleans.

The object must have exactly this shape:
{
  "clause_type": "<kind of clause, e.g. 'Payment Terms'>",
  "parties_involved": ["<party>", ...],
  "summary": "<plain English summary of the clause>",
  "biased_toward": "Client" | "Provider" | "Neutral",
  "risks": ["<risk>", ...],
  "obligations": ["<one obligation per item>", ...],
  "duration": "<deadline, term or effective period>" | null,
  "is_termination_clause": true | false,
  "is_confidentiality_clause": true | false
}

Only describe the clause you are given. Use "Neutral" when neither party clearly benefits. Name parties consistently."#;

pub const FIELDS: [&str; 9] = [
    "clause_type",
    "parties_involved",
    "summary",
    "biased_toward",
    "risks",
    "obligations",
    "duration",
    "is_termination_clause",
    "is_confidentiality_clause",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Bias {
    Client,
    Provider,
    #[default]
    Neutral,
}

impl Bias {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "client" => Some(Bias::Client),
            "provider" => Some(Bias::Provider),
            "neutral" => Some(Bias::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClauseAnnotation {
    pub clause_type: String,
    pub parties_involved: Vec<String>,
    pub summary: String,
    pub biased_toward: Bias,
    pub risks: Vec<String>,
    pub obligations: Vec<String>,
    pub duration: Option<String>,
    pub is_termination_clause: bool,
    pub is_confidentiality_clause: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedClauseRecord {
    pub position: usize,
    pub clause: String,
    pub annotation: ClauseAnnotation,
    /// Fields filled by the defaulting pass; empty when the output parsed cleanly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repaired_fields: Vec<String>,
}

impl ExtractedClauseRecord {
    pub fn was_repaired(&self) -> bool {
        !self.repaired_fields.is_empty()
    }
}

pub struct ClauseExtractor {
    generator: Arc<dyn Generator>,
}

impl ClauseExtractor {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    async fn request(&self, clause_text: &str) -> Result<String> {
        let request = GenerationRequest::json(EXTRACTION_SYSTEM_PROMPT, clause_text);
        self.generator.generate(&request).await
    }

    /// Strict extraction: malformed output is an `ExtractionMalformed` error.
    pub async fn extract(&self, clause_text: &str) -> Result<ClauseAnnotation> {
        let raw = self.request(clause_text).await?;
        parse_annotation(&raw)
    }

    /// Lenient extraction used during processing. Only backend failures are errors;
    /// malformed output is repaired and logged.
    pub async fn extract_record(&self, clause: &Clause) -> Result<ExtractedClauseRecord> {
        let raw = self.request(&clause.text).await?;

        let (annotation, repaired_fields) = match parse_annotation(&raw) {
            Ok(annotation) => (annotation, Vec::new()),
            Err(err) => {
                let (annotation, repaired) = repair_annotation(&raw);
                warn!(
                    position = clause.position,
                    error = %err,
                    repaired = ?repaired,
                    "extraction output malformed; defaults applied"
                );
                (annotation, repaired)
            }
        };

        Ok(ExtractedClauseRecord {
            position: clause.position,
            clause: clause.text.clone(),
            annotation,
            repaired_fields,
        })
    }
}

/// Parse generation output as a complete clause record. All nine fields must be
/// present; only `duration` may be null.
pub fn parse_annotation(raw: &str) -> Result<ClauseAnnotation> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| RagError::ExtractionMalformed(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| RagError::ExtractionMalformed("output is not a JSON object".into()))?;

    if let Some(missing) = FIELDS.iter().find(|field| !object.contains_key(**field)) {
        return Err(RagError::ExtractionMalformed(format!(
            "missing field '{}'",
            missing
        )));
    }

    serde_json::from_value(value).map_err(|e| RagError::ExtractionMalformed(e.to_string()))
}

/// Defaulting pass. Present, usable fields are kept; absent, null or unusable
/// fields take their neutral default and are reported by name.
pub fn repair_annotation(raw: &str) -> (ClauseAnnotation, Vec<String>) {
    let value = locate_json_object(raw).and_then(|s| serde_json::from_str::<Value>(s).ok());
    let empty = Map::new();
    let object = value.as_ref().and_then(Value::as_object).unwrap_or(&empty);
    repair_object(object)
}

pub fn repair_object(object: &Map<String, Value>) -> (ClauseAnnotation, Vec<String>) {
    let clause_type = present(object, "clause_type").and_then(as_text);
    let parties_involved = present(object, "parties_involved").and_then(as_list);
    let summary = present(object, "summary").and_then(as_text);
    let biased_toward = present(object, "biased_toward")
        .and_then(Value::as_str)
        .and_then(Bias::parse);
    let risks = present(object, "risks").and_then(as_list);
    let obligations = present(object, "obligations").and_then(as_list);
    let is_termination_clause = present(object, "is_termination_clause").and_then(as_flag);
    let is_confidentiality_clause =
        present(object, "is_confidentiality_clause").and_then(as_flag);

    // Null is a legitimate duration; only an absent or unusable value is repaired.
    let (duration, duration_ok) = match object.get("duration") {
        None => (None, false),
        Some(Value::Null) => (None, true),
        Some(value) => {
            let text = as_text(value);
            let ok = text.is_some();
            (text, ok)
        }
    };

    let usable = [
        clause_type.is_some(),
        parties_involved.is_some(),
        summary.is_some(),
        biased_toward.is_some(),
        risks.is_some(),
        obligations.is_some(),
        duration_ok,
        is_termination_clause.is_some(),
        is_confidentiality_clause.is_some(),
    ];
    let repaired = FIELDS
        .iter()
        .zip(usable)
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name.to_string())
        .collect();

    let annotation = ClauseAnnotation {
        clause_type: clause_type.unwrap_or_default(),
        parties_involved: parties_involved.unwrap_or_default(),
        summary: summary.unwrap_or_default(),
        biased_toward: biased_toward.unwrap_or_default(),
        risks: risks.unwrap_or_default(),
        obligations: obligations.unwrap_or_default(),
        duration,
        is_termination_clause: is_termination_clause.unwrap_or(false),
        is_confidentiality_clause: is_confidentiality_clause.unwrap_or(false),
    };
    (annotation, repaired)
}

fn present<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).filter(|v| !v.is_null())
}

/// Outermost `{ ... }` span, ignoring surrounding prose or code fences.
fn locate_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(as_text).collect()),
        Value::String(s) if s.trim().is_empty() => Some(Vec::new()),
        Value::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
