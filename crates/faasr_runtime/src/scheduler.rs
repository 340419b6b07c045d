use serde_json::{
    Map,
    Value as JsonValue,
};

use crate::config::Config;
use crate::errors::FaasrError;
use crate::graph::split_rank_suffix;
use crate::payload::{
    Action,
    ComputeServer,
    InvokeNextEntry,
    Payload,
    WorkflowDocument,
};
use crate::providers::{
    self,
    Dispatch,
};

/// Applies §4.8's secret-propagation policy: a destination that keeps
/// its own secret store (`UseSecretStore == true`) gets the scrubbed
/// overlay; one that doesn't gets the (already secret-resolved, see
/// `payload::secrets::replace_secrets`) `ComputeServers`/`DataStores`
/// sections injected instead, mirroring `scheduler.py`'s `invoke_gh`:
/// `overwritten_files["ComputeServers"] = self.faasr["ComputeServers"]`.
fn overlay_for_dispatch(
    payload: &Payload,
    server: &ComputeServer,
    doc: &WorkflowDocument,
) -> anyhow::Result<Map<String, JsonValue>> {
    if server.use_secret_store() {
        return Ok(payload.scrub_secrets_for_dispatch());
    }

    let mut overlay = payload.overlay().clone();
    overlay.insert("ComputeServers".to_string(), serde_json::to_value(&doc.compute_servers)?);
    overlay.insert("DataStores".to_string(), serde_json::to_value(&doc.data_stores)?);
    Ok(overlay)
}

fn stringify_return_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn expand_rank(name: &str, out: &mut Vec<(String, Option<(u32, u32)>)>) {
    let (base, count) = split_rank_suffix(name);
    match count {
        Some(n) if n > 0 => {
            for rank in 1..=n {
                out.push((base.to_string(), Some((rank, n))));
            }
        }
        _ => out.push((base.to_string(), None)),
    }
}

/// Turns an action's `InvokeNext` list plus its return value into the
/// concrete set of successor (function, rank) pairs to trigger,
/// recursing into conditional branches keyed by the stringified return
/// value. Grounded in the successor-resolution walk
/// `graph_functions.py` performs before dispatching triggers.
fn resolve_entries(
    entries: &[InvokeNextEntry],
    return_value: Option<&JsonValue>,
    out: &mut Vec<(String, Option<(u32, u32)>)>,
) -> anyhow::Result<()> {
    for entry in entries {
        match entry {
            InvokeNextEntry::Plain(name) => expand_rank(name, out),
            InvokeNextEntry::Conditional(branches) => {
                let value = return_value.ok_or_else(|| {
                    FaasrError::conditional_without_return(
                        "action has a conditional InvokeNext but returned no value",
                    )
                })?;
                let key = stringify_return_value(value);
                if let Some(branch) = branches.get(&key) {
                    resolve_entries(branch, return_value, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Triggers an action's successors, one HTTP/provider call per resolved
/// (function, rank) target, scrubbing secrets from the overlay when the
/// destination keeps its own copy.
pub struct Scheduler<'a> {
    client: &'a reqwest::Client,
    config: &'a Config,
    doc: &'a WorkflowDocument,
}

impl<'a> Scheduler<'a> {
    pub fn new(client: &'a reqwest::Client, config: &'a Config, doc: &'a WorkflowDocument) -> Self {
        Self { client, config, doc }
    }

    pub fn resolve_targets(
        &self,
        action: &Action,
        return_value: Option<&JsonValue>,
    ) -> anyhow::Result<Vec<(String, Option<(u32, u32)>)>> {
        let mut out = Vec::new();
        resolve_entries(&action.invoke_next.0, return_value, &mut out)?;
        Ok(out)
    }

    pub async fn trigger_all(
        &self,
        action: &Action,
        payload: &Payload,
        return_value: Option<&JsonValue>,
    ) -> anyhow::Result<()> {
        let targets = self.resolve_targets(action, return_value)?;
        for (function_name, rank) in targets {
            self.trigger_func(&function_name, rank, payload).await?;
        }
        Ok(())
    }

    pub async fn trigger_func(
        &self,
        function_name: &str,
        rank: Option<(u32, u32)>,
        payload: &Payload,
    ) -> anyhow::Result<()> {
        let target_action = self.doc.action_list.get(function_name).ok_or_else(|| {
            FaasrError::unreachable_state(format!("unknown successor function {function_name}"))
        })?;
        let server = self
            .doc
            .compute_servers
            .get(&target_action.faas_server)
            .ok_or_else(|| {
                FaasrError::unreachable_state(format!(
                    "successor {function_name} names unknown compute server {}",
                    target_action.faas_server
                ))
            })?;

        let overlay = overlay_for_dispatch(payload, server, self.doc)?;

        providers::trigger(
            self.client,
            server,
            self.config.token.as_deref(),
            self.config.skip_real_triggers,
            Dispatch {
                function_name,
                rank,
                overlay: &overlay,
                resources: target_action.resources.as_ref(),
                payload_url: &self.config.payload_url,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_rank_suffix_into_replicas() {
        let mut out = Vec::new();
        expand_rank("f(3)", &mut out);
        assert_eq!(
            out,
            vec![
                ("f".to_string(), Some((1, 3))),
                ("f".to_string(), Some((2, 3))),
                ("f".to_string(), Some((3, 3))),
            ]
        );
    }

    #[test]
    fn plain_name_has_no_rank() {
        let mut out = Vec::new();
        expand_rank("f", &mut out);
        assert_eq!(out, vec![("f".to_string(), None)]);
    }

    #[test]
    fn conditional_without_return_value_errors() {
        let mut branches = std::collections::BTreeMap::new();
        branches.insert("true".to_string(), vec![InvokeNextEntry::Plain("f".to_string())]);
        let entries = vec![InvokeNextEntry::Conditional(branches)];
        let mut out = Vec::new();
        let err = resolve_entries(&entries, None, &mut out).unwrap_err();
        assert_eq!(
            crate::errors::downcast_kind(&err),
            Some(crate::errors::FaasrErrorKind::ConditionalWithoutReturn)
        );
    }

    #[test]
    fn conditional_picks_matching_branch() {
        use serde_json::json;
        let mut branches = std::collections::BTreeMap::new();
        branches.insert("true".to_string(), vec![InvokeNextEntry::Plain("t".to_string())]);
        branches.insert("false".to_string(), vec![InvokeNextEntry::Plain("f".to_string())]);
        let entries = vec![InvokeNextEntry::Conditional(branches)];
        let mut out = Vec::new();
        resolve_entries(&entries, Some(&json!(true)), &mut out).unwrap();
        assert_eq!(out, vec![("t".to_string(), None)]);
    }

    fn doc_with_stores() -> WorkflowDocument {
        use crate::payload::{
            DataStore,
            FaaSType,
        };

        let mut doc = WorkflowDocument::default();
        doc.compute_servers.insert(
            "gh".to_string(),
            ComputeServer {
                faas_type: FaaSType::GitHubActions,
                fields: json!({ "UserName": "acme" }),
            },
        );
        doc.data_stores.insert(
            "s1".to_string(),
            DataStore {
                endpoint: "https://s3.example.com".to_string(),
                region: "us-east-1".to_string(),
                bucket: "bucket".to_string(),
                access_key: "AKIA...".to_string(),
                secret_key: "shh".to_string(),
                anonymous: None,
            },
        );
        doc
    }

    #[test]
    fn overlay_includes_secrets_when_destination_has_no_secret_store() {
        use crate::payload::FaaSType;

        let doc = doc_with_stores();
        let server = ComputeServer {
            faas_type: FaaSType::GitHubActions,
            fields: json!({}),
        };
        let payload = Payload::new(json!({}), serde_json::Map::new());

        let overlay = overlay_for_dispatch(&payload, &server, &doc).unwrap();
        assert!(overlay.contains_key("ComputeServers"));
        assert!(overlay.contains_key("DataStores"));
        assert_eq!(overlay["DataStores"]["s1"]["Bucket"], json!("bucket"));
    }

    #[test]
    fn overlay_scrubs_secrets_when_destination_uses_its_own_secret_store() {
        use crate::payload::FaaSType;

        let doc = doc_with_stores();
        let server = ComputeServer {
            faas_type: FaaSType::GitHubActions,
            fields: json!({ "UseSecretStore": true }),
        };
        let mut base_overlay = serde_json::Map::new();
        base_overlay.insert("ComputeServers".to_string(), json!({ "leftover": {} }));
        let payload = Payload::new(json!({}), base_overlay);

        let overlay = overlay_for_dispatch(&payload, &server, &doc).unwrap();
        assert!(!overlay.contains_key("ComputeServers"));
        assert!(!overlay.contains_key("DataStores"));
    }
}
