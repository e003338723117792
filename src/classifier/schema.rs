//! Structured output schemas for classifier calls
//!
//! Each model call has an output struct here. The JSON schema sent with the
//! request is generated from the struct with `schemars`; the classification
//! schema is then narrowed so `action` is an enum of the domain's labels.

use crate::types::{Action, Domain, Entities};
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Single-shot classification result
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationOutput {
    /// One of the domain's action labels, or "unknown"
    pub action: String,
    /// Parameters extracted from the request; omit anything not stated
    #[serde(default)]
    pub entities: Entities,
    /// Confidence between 0 and 1
    pub confidence: f32,
    /// One sentence explaining the choice
    #[serde(default)]
    pub rationale: String,
}

/// Self-validation verdict on an earlier classification
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CritiqueOutput {
    /// Whether the proposed action is what the user asked for
    pub is_correct: bool,
    /// Replacement action label when `is_correct` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_action: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub reason: String,
}

/// One step of a decomposed request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanStepOutput {
    pub description: String,
    pub action: String,
    #[serde(default)]
    pub params: Entities,
    /// 1-based indexes of earlier steps whose output this step needs
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// Ordered decomposition of a compound request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanOutput {
    pub steps: Vec<PlanStepOutput>,
}

/// Whether a request asks for several operations in sequence
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SequenceOutput {
    pub sequential: bool,
    #[serde(default)]
    pub reason: String,
}

/// Generate a self-contained schema for `T` (no `$ref` definitions)
pub fn inline_schema<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or_else(|_| json!({ "type": "object" }))
}

/// Labels the model may answer with for a domain
pub fn action_labels(domain: Domain) -> Vec<&'static str> {
    domain
        .valid_actions()
        .iter()
        .map(Action::as_str)
        .chain(std::iter::once(Action::Unknown.as_str()))
        .collect()
}

/// Classification schema with `action` restricted to the domain's labels
pub fn classification_schema(domain: Domain) -> Value {
    let mut schema = inline_schema::<ClassificationOutput>();
    restrict_labels(&mut schema, &["action"], domain);
    if let Some(confidence) = schema.pointer_mut("/properties/confidence") {
        confidence["minimum"] = json!(0.0);
        confidence["maximum"] = json!(1.0);
    }
    schema
}

pub fn critique_schema(domain: Domain) -> Value {
    let mut schema = inline_schema::<CritiqueOutput>();
    restrict_labels(&mut schema, &["corrected_action"], domain);
    schema
}

pub fn plan_schema(domain: Domain) -> Value {
    let mut schema = inline_schema::<PlanOutput>();
    if let Some(step) = schema.pointer_mut("/properties/steps/items") {
        restrict_labels(step, &["action"], domain);
    }
    schema
}

pub fn sequence_schema() -> Value {
    inline_schema::<SequenceOutput>()
}

fn restrict_labels(schema: &mut Value, fields: &[&str], domain: Domain) {
    let labels = json!(action_labels(domain));
    for field in fields {
        if let Some(property) = schema.get_mut("properties").and_then(|p| p.get_mut(*field)) {
            // Option<String> fields are generated as ["string", "null"]
            let nullable = property
                .get("type")
                .and_then(Value::as_array)
                .is_some_and(|types| types.iter().any(|t| t == "null"));
            let mut enum_values = labels.clone();
            if nullable {
                if let Some(values) = enum_values.as_array_mut() {
                    values.push(Value::Null);
                }
            }
            property["enum"] = enum_values;
        }
    }
}

/// Validate a model response against the schema it was asked to follow
pub fn validate_output(schema: &Value, output: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| format!("Schema compilation error: {e}"))?;

    validator.validate(output).map_err(|errors| {
        let messages: Vec<String> = errors
            .map(|e| format!("At '{}': {}", e.instance_path, e))
            .collect();
        messages.join("; ")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_schema_enumerates_domain_actions() {
        let schema = classification_schema(Domain::Calendar);
        let labels = schema["properties"]["action"]["enum"].as_array().unwrap();

        assert!(labels.contains(&json!("find_free_time")));
        assert!(labels.contains(&json!("unknown")));
        assert!(!labels.contains(&json!("reply")));
        assert!(schema.get("definitions").is_none());
    }

    #[test]
    fn test_valid_output_passes_validation() {
        let schema = classification_schema(Domain::Email);
        let output = json!({
            "action": "count",
            "entities": { "unread": true },
            "confidence": 0.92,
            "rationale": "asks how many"
        });
        assert!(validate_output(&schema, &output).is_ok());
    }

    #[test]
    fn test_out_of_domain_action_fails_validation() {
        let schema = classification_schema(Domain::Task);
        let output = json!({
            "action": "forward",
            "entities": {},
            "confidence": 0.9,
            "rationale": ""
        });
        let err = validate_output(&schema, &output).unwrap_err();
        assert!(err.contains("action"));
    }

    #[test]
    fn test_confidence_bounds_are_enforced() {
        let schema = classification_schema(Domain::Task);
        let output = json!({ "action": "list", "confidence": 1.5 });
        assert!(validate_output(&schema, &output).is_err());
    }

    #[test]
    fn test_plan_schema_restricts_step_actions() {
        let schema = plan_schema(Domain::Email);
        let labels = &schema["properties"]["steps"]["items"]["properties"]["action"]["enum"];
        assert!(labels.as_array().unwrap().contains(&json!("reply")));

        let output = json!({
            "steps": [
                { "description": "find it", "action": "search", "params": {}, "depends_on": [] },
                { "description": "reply", "action": "reply", "params": {}, "depends_on": [1] }
            ]
        });
        assert!(validate_output(&plan_schema(Domain::Email), &output).is_ok());
    }

    #[test]
    fn test_critique_schema_allows_null_correction() {
        let schema = critique_schema(Domain::Email);
        let output = json!({ "is_correct": true, "corrected_action": null, "confidence": 0.8, "reason": "" });
        assert!(validate_output(&schema, &output).is_ok());
    }
}
