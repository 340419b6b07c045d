use anyhow::Context;
use serde_json::json;

use crate::errors::FaasrError;
use crate::payload::ComputeServer;

use super::{
    required_field,
    Dispatch,
};

/// Triggers a successor action via GitHub's `workflow_dispatch` REST
/// endpoint, passing the scrubbed overlay as the `OVERWRITTEN` input and
/// the target function (plus rank, if any) as `FUNCTION_INVOKE`/
/// `FUNCTION_RANK`. Grounded in the GitHub Actions dispatch call
/// `scheduler.py`'s `invoke_gh` issues for `FaaSType: GitHubActions`
/// successors: the workflow file is the successor's own name
/// (`{function}.yml`), not a server-level setting, unless the name
/// already carries a `.yaml`/`.ml` extension.
pub async fn dispatch(
    client: &reqwest::Client,
    server: &ComputeServer,
    token: Option<&str>,
    dispatch: Dispatch<'_>,
) -> anyhow::Result<()> {
    let owner = required_field(server, "UserName")?;
    let repo = required_field(server, "ActionRepoName")?;
    let workflow = if dispatch.function_name.ends_with(".ml") || dispatch.function_name.ends_with(".yaml") {
        dispatch.function_name.to_string()
    } else {
        format!("{}.yml", dispatch.function_name)
    };
    let branch = server.field_str("Branch").unwrap_or("main");
    let token = token
        .or_else(|| server.field_str("Token"))
        .ok_or_else(|| FaasrError::provider_dispatch("no GitHub token available for dispatch"))?;

    let url = format!(
        "https://api.github.com/repos/{owner}/{repo}/actions/workflows/{workflow}/dispatches"
    );

    let mut inputs = serde_json::Map::new();
    inputs.insert("FUNCTION_INVOKE".to_string(), json!(dispatch.function_name));
    if let Some((rank, of)) = dispatch.rank {
        inputs.insert("FUNCTION_RANK".to_string(), json!(format!("{rank}/{of}")));
    }
    inputs.insert(
        "OVERWRITTEN".to_string(),
        json!(serde_json::Value::Object(dispatch.overlay.clone()).to_string()),
    );
    inputs.insert("PAYLOAD_URL".to_string(), json!(dispatch.payload_url));

    let body = json!({ "ref": branch, "inputs": inputs });

    let resp = client
        .post(&url)
        .bearer_auth(token)
        .header("User-Agent", "faasr-runtime")
        .header("Accept", "application/vnd.github.v3+json")
        .json(&body)
        .send()
        .await
        .with_context(|| FaasrError::provider_dispatch(format!("workflow_dispatch request to {url} failed")))?;

    if resp.status().as_u16() != 204 {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(FaasrError::provider_dispatch(format!(
            "workflow_dispatch to {owner}/{repo}/{workflow} returned {status}: {text}"
        ))
        .into());
    }

    Ok(())
}
