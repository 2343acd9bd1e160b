//! Detection response normalization.
//!
//! The detection service is not consistent about its payload shape: findings
//! may arrive as a bare array or under `violations`, `findings`,
//! `detections`, `predictions` or `results`; confidences may be numbers or
//! strings such as `"0.87"`; geometry may be an array or an object.
//!
//! Normalization never drops an entry. Bad confidences are clamped into
//! [0,1] and reported as `NormalizationWarning`s next to the findings rather
//! than on them. The only hard failure is a response with no findings
//! container at all.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{MonitorError, Result};
use crate::finding::{BoundingBox, Finding};

const CONTAINER_KEYS: [&str; 5] = ["violations", "findings", "detections", "predictions", "results"];
const LABEL_KEYS: [&str; 3] = ["label", "class", "name"];
const CONFIDENCE_KEYS: [&str; 3] = ["confidence", "conf", "score"];
const BOX_KEYS: [&str; 3] = ["bbox", "box", "bounding_box"];
const UNKNOWN_LABEL: &str = "unknown";

/// Coercion applied to one entry of the raw response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizationWarning {
    /// Position of the entry in the service's list.
    pub index: usize,
    pub label: String,
    pub reason: String,
}

/// Findings plus whatever the normalizer had to fix up along the way.
#[derive(Clone, Debug, Default)]
pub struct Normalized {
    pub findings: Vec<Finding>,
    pub warnings: Vec<NormalizationWarning>,
    /// Base64 JPEG with boxes drawn by the service, passed through untouched.
    pub annotated_image: Option<String>,
}

impl Normalized {
    pub fn violation_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_violation()).count()
    }
}

pub fn normalize(raw: &Value) -> Result<Normalized> {
    let (entries, annotated_image) = match raw {
        Value::Array(entries) => (entries, None),
        Value::Object(map) => {
            let entries = find_container(map).ok_or_else(|| {
                MonitorError::MalformedResponse(format!(
                    "no findings container (expected one of {})",
                    CONTAINER_KEYS.join(", ")
                ))
            })?;
            let annotated = map
                .get("annotated_image_base64")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            (entries, annotated)
        }
        other => {
            return Err(MonitorError::MalformedResponse(format!(
                "expected array or object, got {}",
                json_kind(other)
            )))
        }
    };

    let mut out = Normalized {
        findings: Vec::with_capacity(entries.len()),
        warnings: Vec::new(),
        annotated_image,
    };
    for (index, entry) in entries.iter().enumerate() {
        let finding = normalize_entry(index, entry, &mut out.warnings);
        out.findings.push(finding);
    }

    if !out.warnings.is_empty() {
        log::debug!(
            "Normalizer: {} findings, {} coerced",
            out.findings.len(),
            out.warnings.len()
        );
    }
    Ok(out)
}

fn find_container(map: &Map<String, Value>) -> Option<&Vec<Value>> {
    CONTAINER_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
}

fn normalize_entry(index: usize, entry: &Value, warnings: &mut Vec<NormalizationWarning>) -> Finding {
    let mut warn = |label: &str, reason: String| {
        warnings.push(NormalizationWarning {
            index,
            label: label.to_string(),
            reason,
        })
    };

    // A bare string entry is a label with no confidence.
    let empty = Map::new();
    let (fields, bare_label) = match entry {
        Value::Object(map) => (map, None),
        Value::String(label) => (&empty, Some(label.clone())),
        other => {
            warn(UNKNOWN_LABEL, format!("entry is {}, not an object", json_kind(other)));
            (&empty, None)
        }
    };

    let label = bare_label
        .or_else(|| {
            LABEL_KEYS
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if entry.is_object() {
                warn(UNKNOWN_LABEL, "missing label".to_string());
            }
            UNKNOWN_LABEL.to_string()
        });

    let raw_confidence = CONFIDENCE_KEYS.iter().find_map(|key| fields.get(*key));
    let confidence = match coerce_confidence(raw_confidence) {
        Ok(value) => value,
        Err((value, reason)) => {
            warn(&label, reason);
            value
        }
    };

    let bounding_box = match BOX_KEYS.iter().find_map(|key| fields.get(*key)) {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let parsed = parse_box(raw);
            if parsed.is_none() {
                warn(&label, "unparseable bounding box dropped".to_string());
            }
            parsed
        }
    };

    Finding::new(label, confidence, bounding_box)
}

/// Ok when the value was already a valid probability, Err with the repaired
/// value and the reason otherwise.
fn coerce_confidence(raw: Option<&Value>) -> std::result::Result<f32, (f32, String)> {
    let parsed = match raw {
        None | Some(Value::Null) => return Err((0.0, "missing confidence".to_string())),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(other) => {
            return Err((0.0, format!("confidence is {}, not numeric", json_kind(other))))
        }
    };
    let Some(value) = parsed else {
        return Err((0.0, "non-numeric confidence".to_string()));
    };
    if value.is_nan() {
        return Err((0.0, "confidence is NaN".to_string()));
    }
    if !(0.0..=1.0).contains(&value) {
        let clamped = value.clamp(0.0, 1.0) as f32;
        return Err((clamped, format!("confidence {} clamped to {}", value, clamped)));
    }
    Ok(value as f32)
}

fn parse_box(raw: &Value) -> Option<BoundingBox> {
    let corners: Vec<f32> = match raw {
        Value::Array(values) if values.len() == 4 => values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<_>>>()?,
        Value::Object(map) => ["x1", "y1", "x2", "y2"]
            .iter()
            .map(|key| map.get(*key).and_then(Value::as_f64).map(|f| f as f32))
            .collect::<Option<Vec<_>>>()?,
        _ => return None,
    };
    BoundingBox::from_corners(corners[0], corners[1], corners[2], corners[3])
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
