//! `replace_secrets`: substitutes credential placeholders in the base
//! payload with real values pulled from the process environment.
//!
//! FaaSr workflow JSON never embeds raw credentials; fields like
//! `AccessKey` or a compute server's `Token` hold the *name* of an
//! environment variable, and the runtime substitutes the actual value
//! at load time. Grounded in `faasr_replace_values.py`'s recursive walk
//! over the payload tree.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

/// Subtrees `replace_secrets` never descends into: these sections name
/// functions, packages and git sources, not credentials, and a
/// coincidental match against an env var name here would corrupt them.
pub const EXCLUDED_SECTIONS: &[&str] = &[
    "FunctionGitRepo",
    "ActionList",
    "FunctionCRANPackage",
    "FunctionGitHubPackage",
    "PyPIPackageDownloads",
    "PackageImports",
];

/// Walks `base`, replacing every string leaf whose value is a key in
/// `secret_map` with the corresponding secret value. Leaves that don't
/// match any key in `secret_map` are left untouched, since most string
/// fields (function names, regions, URLs) are not secret placeholders.
pub fn replace_secrets(base: &JsonValue, secret_map: &HashMap<String, String>) -> JsonValue {
    replace_in_value(base, secret_map, true)
}

fn replace_in_value(value: &JsonValue, secret_map: &HashMap<String, String>, is_top_level: bool) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, child) in map {
                let replaced = if is_top_level && EXCLUDED_SECTIONS.contains(&key.as_str()) {
                    child.clone()
                } else {
                    replace_in_value(child, secret_map, false)
                };
                out.insert(key.clone(), replaced);
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| replace_in_value(item, secret_map, false))
                .collect(),
        ),
        JsonValue::String(s) => secret_map
            .get(s)
            .map(|secret| JsonValue::String(secret.clone()))
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

/// Builds the secret map from the process environment: every
/// environment variable is a candidate placeholder value.
pub fn secret_map_from_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_matching_leaf() {
        let base = json!({ "DataStores": { "s1": { "AccessKey": "MY_ACCESS_KEY" } } });
        let mut secrets = HashMap::new();
        secrets.insert("MY_ACCESS_KEY".to_string(), "AKIA...".to_string());

        let replaced = replace_secrets(&base, &secrets);
        assert_eq!(replaced["DataStores"]["s1"]["AccessKey"], json!("AKIA..."));
    }

    #[test]
    fn excluded_sections_are_never_substituted() {
        let base = json!({
            "ActionList": { "f1": { "FunctionName": "MY_ACCESS_KEY" } },
            "FunctionGitRepo": "MY_ACCESS_KEY"
        });
        let mut secrets = HashMap::new();
        secrets.insert("MY_ACCESS_KEY".to_string(), "leaked".to_string());

        let replaced = replace_secrets(&base, &secrets);
        assert_eq!(replaced["ActionList"]["f1"]["FunctionName"], json!("MY_ACCESS_KEY"));
        assert_eq!(replaced["FunctionGitRepo"], json!("MY_ACCESS_KEY"));
    }

    #[test]
    fn unmatched_strings_are_left_as_is() {
        let base = json!({ "DataStores": { "s1": { "Region": "us-east-1" } } });
        let replaced = replace_secrets(&base, &HashMap::new());
        assert_eq!(replaced, base);
    }
}
