use anyhow::Context;
use serde_json::json;

use crate::errors::FaasrError;
use crate::payload::ComputeServer;

use super::{
    required_field,
    Dispatch,
};

/// Triggers a successor action via an OpenWhisk `actions` REST
/// invocation, authenticated with the namespace's basic-auth API key.
/// Dispatched `blocking=false` — this runtime fires the successor and
/// moves on rather than waiting on its result, matching every other
/// provider's fire-and-forget trigger semantics.
pub async fn dispatch(
    client: &reqwest::Client,
    server: &ComputeServer,
    dispatch: Dispatch<'_>,
) -> anyhow::Result<()> {
    let endpoint = required_field(server, "Endpoint")?;
    let namespace = required_field(server, "Namespace")?;
    let api_key = required_field(server, "APIkey")?;
    let action_name = dispatch.function_name;

    let (user, pass) = api_key
        .split_once(':')
        .ok_or_else(|| FaasrError::provider_dispatch("OpenWhisk APIkey is not in user:pass form"))?;

    let url = format!(
        "{}/api/v1/namespaces/{namespace}/actions/{action_name}?blocking=false&result=false",
        endpoint.trim_end_matches('/')
    );

    let mut payload = dispatch.overlay.clone();
    if let Some((rank, of)) = dispatch.rank {
        payload.insert("FUNCTION_RANK".to_string(), json!(format!("{rank}/{of}")));
    }
    payload.insert("FUNCTION_INVOKE".to_string(), json!(action_name));
    payload.insert("PAYLOAD_URL".to_string(), json!(dispatch.payload_url));

    let resp = client
        .post(&url)
        .basic_auth(user, Some(pass))
        .json(&serde_json::Value::Object(payload))
        .send()
        .await
        .with_context(|| FaasrError::provider_dispatch(format!("OpenWhisk invoke to {url} failed")))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(FaasrError::provider_dispatch(format!(
            "OpenWhisk invoke to {url} returned {status}: {text}"
        ))
        .into());
    }

    Ok(())
}
