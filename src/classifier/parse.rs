//! Defensive parsing of model output
//!
//! Free-text completions wrap JSON in markdown fences, prose, or both, and
//! often bend the shape: trailing commas, `intent` instead of `action`,
//! confidence as `"85%"`. Everything here returns `None` rather than failing.

use super::schema::PlanStepOutput;
use crate::types::{clean_entities, Action, Confidence, Domain, Entities};
use serde_json::{Map, Value};

/// Normalized classification fields
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClassification {
    pub action: Action,
    pub entities: Entities,
    pub confidence: Confidence,
    pub rationale: String,
}

/// Extract the first top-level JSON object from raw text
///
/// Braces inside string literals are ignored, so a `}` in a quoted subject
/// does not end the object early.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let mut start = None;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in raw.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if start.is_some() => in_string = true,
            '{' => {
                if start.is_none() {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(raw[s..=idx].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove commas that directly precede `}` or `]`
pub fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// Parse a completion into a JSON object, tolerating wrappers and trailing commas
pub fn parse_json_lenient(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let object = extract_json_object(trimmed)?;
    serde_json::from_str::<Value>(&object)
        .or_else(|_| serde_json::from_str::<Value>(&strip_trailing_commas(&object)))
        .ok()
        .filter(Value::is_object)
}

/// Read a confidence given as a number, a numeric string, or a percentage
pub fn parse_confidence(value: &Value) -> Option<Confidence> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok()? / 100.0,
                None => s.parse::<f64>().ok()?,
            }
        }
        _ => return None,
    };
    // Whole-number answers such as 85 mean a percentage
    let scaled = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    Some(Confidence::new(scaled as f32))
}

/// Map a label onto a domain action; anything unrecognised is `Unknown`
pub fn parse_action(label: &str, domain: Domain) -> Action {
    match Action::parse_lenient(label) {
        Some(action) if action.is_unknown() || domain.supports(action) => action,
        _ => Action::Unknown,
    }
}

fn object_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| object.get(*k))
}

fn entities_field(object: &Map<String, Value>) -> Entities {
    match object_field(object, &["entities", "params", "parameters"]) {
        Some(Value::Object(map)) => {
            clean_entities(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        _ => Entities::new(),
    }
}

/// Normalize a classification object, accepting common shape variations
pub fn normalize_classification(value: &Value, domain: Domain) -> Option<ParsedClassification> {
    let object = value.as_object()?;
    let label = object_field(object, &["action", "intent"])?.as_str()?;
    let action = parse_action(label, domain);

    let confidence = if action.is_unknown() {
        Confidence::ZERO
    } else {
        object_field(object, &["confidence", "score"])
            .and_then(parse_confidence)
            .unwrap_or(Confidence::new(0.5))
    };

    let rationale = object_field(object, &["rationale", "reasoning", "reason"])
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Some(ParsedClassification {
        action,
        entities: entities_field(object),
        confidence,
        rationale,
    })
}

/// Parse raw completion text as a classification
pub fn parse_classification(raw: &str, domain: Domain) -> Option<ParsedClassification> {
    normalize_classification(&parse_json_lenient(raw)?, domain)
}

/// Normalize plan steps, tolerating a bare array or a `steps` field
pub fn normalize_plan_steps(value: &Value) -> Option<Vec<PlanStepOutput>> {
    let steps = match value {
        Value::Array(items) => items,
        Value::Object(object) => object_field(object, &["steps", "plan"])?.as_array()?,
        _ => return None,
    };

    let parsed: Vec<PlanStepOutput> = steps
        .iter()
        .filter_map(|step| {
            let object = step.as_object()?;
            let action = object_field(object, &["action", "intent"])
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let description = object_field(object, &["description", "step", "text"])
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let depends_on = object_field(object, &["depends_on", "dependencies"])
                .and_then(Value::as_array)
                .map(|deps| {
                    deps.iter()
                        .filter_map(Value::as_u64)
                        .map(|d| d as usize)
                        .collect()
                })
                .unwrap_or_default();
            Some(PlanStepOutput {
                description,
                action,
                params: entities_field(object),
                depends_on,
            })
        })
        .collect();

    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

/// Read a yes/no answer from a sequence-detection reply
pub fn parse_sequence_answer(raw: &str) -> Option<bool> {
    if let Some(value) = parse_json_lenient(raw) {
        if let Some(flag) = value
            .as_object()
            .and_then(|o| object_field(o, &["sequential", "is_multi_step", "multi_step"]))
            .and_then(Value::as_bool)
        {
            return Some(flag);
        }
    }

    let lowered = raw.trim().to_lowercase();
    if lowered.starts_with("yes") || lowered.starts_with("true") {
        Some(true)
    } else if lowered.starts_with("no") || lowered.starts_with("false") {
        Some(false)
    } else {
        None
    }
}
