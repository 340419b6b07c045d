use anyhow::Context;
use serde_json::json;

use crate::errors::FaasrError;
use crate::payload::ComputeServer;

use super::{
    required_field,
    Dispatch,
};

/// Triggers a successor action hosted behind an AWS Lambda Function URL.
/// Function URLs accept a plain HTTPS POST, so no SigV4 signing is
/// needed here — the same tradeoff the Python original makes by relying
/// on a public or IAM-auth-disabled Function URL rather than embedding
/// AWS credentials in the worker payload.
pub async fn dispatch(
    client: &reqwest::Client,
    server: &ComputeServer,
    dispatch: Dispatch<'_>,
) -> anyhow::Result<()> {
    let function_url = required_field(server, "Endpoint")?;

    let body = json!({
        "FUNCTION_INVOKE": dispatch.function_name,
        "FUNCTION_RANK": dispatch.rank.map(|(rank, of)| format!("{rank}/{of}")),
        "OVERWRITTEN": serde_json::Value::Object(dispatch.overlay.clone()),
        "PAYLOAD_URL": dispatch.payload_url,
    });

    let mut req = client.post(function_url).json(&body);
    if let Some(api_key) = server.field_str("ApiKey") {
        req = req.header("x-api-key", api_key);
    }

    let resp = req
        .send()
        .await
        .with_context(|| FaasrError::provider_dispatch(format!("Lambda invoke to {function_url} failed")))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(FaasrError::provider_dispatch(format!(
            "Lambda invoke to {function_url} returned {status}: {text}"
        ))
        .into());
    }

    Ok(())
}
