pub mod github_actions;
pub mod lambda;
pub mod openwhisk;
pub mod slurm;

use serde_json::{
    Map,
    Value as JsonValue,
};

use crate::errors::FaasrError;
use crate::payload::{
    ComputeServer,
    FaaSType,
    Resources,
};

/// What a successor invocation is triggered with: the function to run
/// and the overlay (secrets already scrubbed per the destination's
/// `UseSecretStore` flag) it should start from.
pub struct Dispatch<'a> {
    pub function_name: &'a str,
    pub rank: Option<(u32, u32)>,
    pub overlay: &'a Map<String, JsonValue>,
    pub resources: Option<&'a Resources>,
    pub payload_url: &'a str,
}

/// Sends `dispatch` to `server`, logging it instead of issuing the real
/// call when `skip_real_triggers` is set. One function per `FaaSType`
/// member, matching the provider-specific wire formats the Python
/// original's `graph_functions` trigger helpers speak.
pub async fn trigger(
    client: &reqwest::Client,
    server: &ComputeServer,
    token: Option<&str>,
    skip_real_triggers: bool,
    dispatch: Dispatch<'_>,
) -> anyhow::Result<()> {
    if skip_real_triggers {
        tracing::info!(
            function = dispatch.function_name,
            faas_type = ?server.faas_type,
            "skipping real trigger (FAASR_SKIP_REAL_TRIGGERS set)"
        );
        return Ok(());
    }

    match server.faas_type {
        FaaSType::GitHubActions => github_actions::dispatch(client, server, token, dispatch).await,
        FaaSType::Lambda => lambda::dispatch(client, server, dispatch).await,
        FaaSType::OpenWhisk => openwhisk::dispatch(client, server, dispatch).await,
        FaaSType::SLURM => slurm::dispatch(client, server, dispatch).await,
    }
}

pub(crate) fn required_field<'a>(server: &'a ComputeServer, key: &str) -> anyhow::Result<&'a str> {
    server
        .field_str(key)
        .ok_or_else(|| FaasrError::provider_dispatch(format!("compute server missing {key}")).into())
}
