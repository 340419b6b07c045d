use jsonschema::Validator;
use serde_json::Value as JsonValue;

use crate::errors::FaasrError;

/// Structural shape every workflow payload must satisfy before it is
/// parsed into a [`crate::payload::model::WorkflowDocument`]. Mirrors the
/// checks `graph_functions.validate_json` performs ahead of graph
/// analysis in the Python original: required top-level sections, and
/// that every `ActionList` entry names a `FaaSServer` that actually
/// exists in `ComputeServers`.
fn schema() -> JsonValue {
    serde_json::json!({
        "type": "object",
        "required": ["ActionList", "ComputeServers"],
        "properties": {
            "ActionList": {
                "type": "object",
                "minProperties": 1,
                "additionalProperties": {
                    "type": "object",
                    "required": ["FunctionName", "Type", "FaaSServer"],
                    "properties": {
                        "FunctionName": { "type": "string", "minLength": 1 },
                        "Type": { "type": "string", "enum": ["Python", "R"] },
                        "FaaSServer": { "type": "string", "minLength": 1 },
                        "InvokeNext": {},
                        "Arguments": {},
                        "Rank": { "type": "string" },
                        "UseSecretStore": { "type": "boolean" }
                    }
                }
            },
            "ComputeServers": {
                "type": "object",
                "minProperties": 1,
                "additionalProperties": {
                    "type": "object",
                    "required": ["FaaSType"],
                    "properties": {
                        "FaaSType": {
                            "type": "string",
                            "enum": ["GitHubActions", "Lambda", "OpenWhisk", "SLURM"]
                        }
                    }
                }
            },
            "DataStores": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "required": ["Bucket"],
                    "properties": {
                        "Endpoint": { "type": "string" },
                        "Bucket": { "type": "string", "minLength": 1 },
                        "Region": { "type": "string" },
                        "AccessKey": { "type": "string" },
                        "SecretKey": { "type": "string" },
                        "Anonymous": { "type": "string" }
                    }
                }
            }
        }
    })
}

/// Validates `doc` against the structural schema, then checks that every
/// action's `FaaSServer` resolves to a declared compute server — a
/// cross-field invariant `jsonschema` cannot express directly.
pub fn validate(doc: &JsonValue) -> anyhow::Result<()> {
    let compiled: Validator = jsonschema::validator_for(&schema())
        .expect("static schema document is always valid");

    let errors: Vec<String> = compiled
        .iter_errors(doc)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();
    if !errors.is_empty() {
        return Err(FaasrError::schema_violation(errors.join("; ")).into());
    }

    let server_names: std::collections::HashSet<&str> = doc
        .get("ComputeServers")
        .and_then(JsonValue::as_object)
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();

    if let Some(actions) = doc.get("ActionList").and_then(JsonValue::as_object) {
        for (name, action) in actions {
            let server = action.get("FaaSServer").and_then(JsonValue::as_str);
            match server {
                Some(server) if server_names.contains(server) => {}
                Some(server) => {
                    return Err(FaasrError::schema_violation(format!(
                        "action {name} names unknown FaaSServer {server}"
                    ))
                    .into());
                }
                None => {
                    return Err(FaasrError::schema_violation(format!(
                        "action {name} is missing FaaSServer"
                    ))
                    .into());
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_doc() -> JsonValue {
        json!({
            "ActionList": {
                "f1": {
                    "FunctionName": "f1",
                    "Type": "Python",
                    "FaaSServer": "gh",
                    "InvokeNext": []
                }
            },
            "ComputeServers": {
                "gh": { "FaaSType": "GitHubActions" }
            }
        })
    }

    #[test]
    fn accepts_well_formed_document() {
        assert!(validate(&valid_doc()).is_ok());
    }

    #[test]
    fn rejects_missing_action_list() {
        let doc = json!({ "ComputeServers": { "gh": { "FaaSType": "GitHubActions" } } });
        assert!(validate(&doc).is_err());
    }

    #[test]
    fn rejects_unknown_faas_server() {
        let mut doc = valid_doc();
        doc["ActionList"]["f1"]["FaaSServer"] = json!("missing");
        assert!(validate(&doc).is_err());
    }
}
