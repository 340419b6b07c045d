use anyhow::Context;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::errors::FaasrError;
use crate::payload::{
    ComputeServer,
    Resources,
};

use super::{
    required_field,
    Dispatch,
};

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Decodes (without verifying the signature — `slurmrestd` itself is the
/// verifier) a JWT's payload segment and checks its `exp` claim against
/// wall-clock time, mirroring the expiry check `slurm_helper.py` runs
/// before trusting a cached token.
fn check_jwt_not_expired(token: &str) -> anyhow::Result<()> {
    let mut segments = token.split('.');
    segments.next().ok_or_else(|| FaasrError::jwt_invalid("JWT has no header segment"))?;
    let payload_b64 = segments
        .next()
        .ok_or_else(|| FaasrError::jwt_invalid("JWT has no payload segment"))?;

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .with_context(|| FaasrError::jwt_invalid("JWT payload is not valid base64url"))?;
    let claims: JwtClaims = serde_json::from_slice(&decoded)
        .with_context(|| FaasrError::jwt_invalid("JWT payload is not valid JSON"))?;

    let Some(exp) = claims.exp else {
        return Ok(());
    };

    let now = chrono::Utc::now().timestamp();
    if now >= exp {
        return Err(FaasrError::jwt_expired(format!("SLURM JWT expired at {exp}, now {now}")).into());
    }
    Ok(())
}

/// Resource requirement fallback order: the action's own `Resources`
/// block, then the compute server's cluster-wide defaults, then the
/// runtime's own baseline. Mirrors the layered lookup
/// `slurm_helper.py`'s job-script template performs.
fn resolve_resources(action_resources: Option<&Resources>, server: &ComputeServer) -> Resources {
    let server_defaults: Resources = server
        .fields
        .get("DefaultResources")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    Resources {
        partition: action_resources
            .and_then(|r| r.partition.clone())
            .or(server_defaults.partition)
            .or_else(|| Some("faasr".to_string())),
        nodes: action_resources.and_then(|r| r.nodes).or(server_defaults.nodes).or(Some(1)),
        tasks: action_resources.and_then(|r| r.tasks).or(server_defaults.tasks).or(Some(1)),
        cpus_per_task: action_resources
            .and_then(|r| r.cpus_per_task)
            .or(server_defaults.cpus_per_task)
            .or(Some(1)),
        memory: action_resources.and_then(|r| r.memory).or(server_defaults.memory).or(Some(1024)),
        time_limit: action_resources
            .and_then(|r| r.time_limit)
            .or(server_defaults.time_limit)
            .or(Some(60)),
        working_directory: action_resources
            .and_then(|r| r.working_directory.clone())
            .or(server_defaults.working_directory)
            .or_else(|| Some("/tmp".to_string())),
    }
}

/// Submits a successor action as a `slurmrestd` job. The job script
/// invokes this same binary with `PAYLOAD_URL`/`OVERWRITTEN` set so the
/// new invocation re-enters the same control flow as any other
/// provider's successor.
pub async fn dispatch(
    client: &reqwest::Client,
    server: &ComputeServer,
    dispatch: Dispatch<'_>,
) -> anyhow::Result<()> {
    let endpoint = required_field(server, "Endpoint")?;
    let token = required_field(server, "Token")?;
    let user_name = required_field(server, "UserName")?;
    check_jwt_not_expired(token)?;

    let resources = resolve_resources(dispatch.resources, server);
    let overlay_json = serde_json::Value::Object(dispatch.overlay.clone()).to_string();
    let function_invoke = dispatch.function_name;
    let function_rank = dispatch
        .rank
        .map(|(rank, of)| format!("{rank}/{of}"))
        .unwrap_or_default();

    let payload_url = dispatch.payload_url;
    let script = format!(
        "#!/bin/sh\nexport FUNCTION_INVOKE={function_invoke}\nexport FUNCTION_RANK={function_rank}\nexport PAYLOAD_URL={payload_url}\nexport OVERWRITTEN='{overlay_json}'\nfaasr-run\n"
    );

    let url = format!("{}/slurm/v0.0.40/job/submit", endpoint.trim_end_matches('/'));
    let body = json!({
        "script": script,
        "job": {
            "name": format!("faasr-{function_invoke}"),
            "partition": resources.partition,
            "nodes": resources.nodes,
            "tasks": resources.tasks,
            "cpus_per_task": resources.cpus_per_task,
            "memory_per_node": resources.memory,
            "time_limit": resources.time_limit,
            "current_working_directory": resources.working_directory.unwrap_or_else(|| "/tmp".to_string()),
        }
    });

    let resp = client
        .post(&url)
        .header("X-SLURM-USER-TOKEN", token)
        .header("X-SLURM-USER-NAME", user_name)
        .json(&body)
        .send()
        .await
        .with_context(|| FaasrError::provider_dispatch(format!("SLURM job submit to {url} failed")))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(FaasrError::provider_dispatch(format!(
            "SLURM job submit to {url} returned {status}: {text}"
        ))
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_jwt(exp: i64) -> String {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{}");
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!("{{\"exp\":{exp}}}"));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn rejects_expired_token() {
        let token = make_jwt(1);
        let err = check_jwt_not_expired(&token).unwrap_err();
        assert_eq!(
            crate::errors::downcast_kind(&err),
            Some(crate::errors::FaasrErrorKind::JwtExpired)
        );
    }

    #[test]
    fn accepts_future_expiry() {
        let token = make_jwt(chrono::Utc::now().timestamp() + 3600);
        assert!(check_jwt_not_expired(&token).is_ok());
    }

    #[test]
    fn rejects_malformed_token() {
        let err = check_jwt_not_expired("not-a-jwt").unwrap_err();
        assert_eq!(
            crate::errors::downcast_kind(&err),
            Some(crate::errors::FaasrErrorKind::JwtInvalid)
        );
    }
}
