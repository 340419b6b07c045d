use std::collections::BTreeMap;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use serde_json::Value as JsonValue;

use crate::config::Config;
use crate::errors::FaasrError;
use crate::log_sink::LogBuffer;
use crate::object_store::ObjectStoreClient;
use crate::payload::{
    DataStore,
    FunctionType,
};
use crate::paths;
use crate::sidecar::{
    client::wait_until_ready,
    server::SidecarContext,
    Sidecar,
};

pub struct ExecutionOutcome {
    pub return_value: Option<JsonValue>,
}

/// Everything one call to [`execute`] needs to run an action's user
/// function and record that it ran. Grouped into one struct because the
/// executor sits at the seam between nearly every other component:
/// object store, payload, graph naming, and the sidecar all meet here.
pub struct ExecutionRequest<'a> {
    pub config: &'a Config,
    pub function_type: FunctionType,
    pub entrypoint: &'a Path,
    pub function_name: &'a str,
    pub arguments: JsonValue,
    pub function_rank: Option<String>,
    pub store_client: &'a ObjectStoreClient,
    pub data_stores: BTreeMap<String, DataStore>,
    pub default_store_name: Option<String>,
    pub logging_store_name: &'a str,
    pub logging_store: &'a DataStore,
    pub root: &'a str,
    pub log_buffer: LogBuffer,
}

fn interpreter_for(function_type: FunctionType) -> &'static str {
    match function_type {
        FunctionType::Python => "python3",
        FunctionType::R => "Rscript",
    }
}

/// Runs one action's user function as a child process, isolated from
/// this runtime's own memory: the child can only reach the runtime
/// through the loopback HTTP sidecar, even when both happen to be the
/// same language. Grounded in how `faasr_run_function.py` drives the
/// child, waits on its readiness and exit status, and — critically for
/// fan-in correctness — only writes the action's done-flag after the
/// child has actually returned successfully.
pub async fn execute(req: ExecutionRequest<'_>) -> anyhow::Result<ExecutionOutcome> {
    if req.config.skip_user_function {
        return Ok(ExecutionOutcome { return_value: None });
    }

    let port = if req.config.sidecar_port == 0 {
        portpicker::pick_unused_port()
            .ok_or_else(|| FaasrError::user_function_failure("no free ephemeral port for sidecar"))?
    } else {
        req.config.sidecar_port
    };

    // The sidecar's axum server runs in its own spawned task and needs
    // 'static ownership, so it gets its own client cache rather than
    // borrowing `req.store_client`; a fresh `ObjectStoreClient` is cheap
    // since `client_for` only builds an S3 client the first time a given
    // store name is actually used.
    let ctx = SidecarContext {
        function_rank: req.function_rank.clone(),
        store_client: Arc::new(ObjectStoreClient::new()),
        data_stores: req.data_stores,
        default_store_name: req.default_store_name,
        log_buffer: req.log_buffer,
    };

    let sidecar = Sidecar::start(port, ctx)
        .await
        .context(FaasrError::user_function_failure("sidecar failed to start"))?;

    let run_result = run_child(
        req.config,
        &sidecar,
        req.function_type,
        req.entrypoint,
        req.function_name,
        &req.arguments,
        req.function_rank.as_deref(),
    )
    .await;

    let return_value = sidecar.return_value().await;
    let (reported_error, message) = sidecar.error().await;

    sidecar
        .shutdown()
        .await
        .context(FaasrError::user_function_failure("sidecar failed to shut down"))?;

    run_result?;

    if reported_error {
        return Err(FaasrError::user_function_failure(
            message.unwrap_or_else(|| "user function reported failure with no message".to_string()),
        )
        .into());
    }

    write_done_flag(req.store_client, req.logging_store_name, req.logging_store, req.root, req.function_name, req.function_rank.as_deref())
        .await?;

    Ok(ExecutionOutcome { return_value })
}

async fn run_child(
    config: &Config,
    sidecar: &Sidecar,
    function_type: FunctionType,
    entrypoint: &Path,
    function_name: &str,
    arguments: &JsonValue,
    function_rank: Option<&str>,
) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    wait_until_ready(
        &http,
        sidecar.port,
        config.sidecar_ready_timeout(),
        Duration::from_millis(200),
    )
    .await?;

    let arguments_json = serde_json::to_string(arguments)
        .context(FaasrError::user_function_failure("failed to serialize Arguments"))?;

    let mut command = tokio::process::Command::new(interpreter_for(function_type));
    command
        .arg(entrypoint)
        .arg(function_name)
        .arg(&arguments_json)
        .env("FAASR_SIDECAR_PORT", sidecar.port.to_string())
        .env("FAASR_FUNCTION_RANK", function_rank.unwrap_or_default())
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    let status = command
        .status()
        .await
        .context(FaasrError::user_function_failure("failed to spawn user function process"))?;

    if !status.success() {
        return Err(FaasrError::user_function_failure(format!(
            "user function exited with {status}"
        ))
        .into());
    }

    Ok(())
}

/// Writes `<root>/<function_name>[.<rank>].done` to both the object
/// store and a local temp mirror, per SPEC_FULL.md section 4.7 step 5.
/// Every downstream fan-in barrier consults the object-store copy; the
/// local mirror exists only for debugging a single invocation without
/// round-tripping through the store.
async fn write_done_flag(
    store_client: &ObjectStoreClient,
    store_name: &str,
    store: &DataStore,
    root: &str,
    function_name: &str,
    function_rank: Option<&str>,
) -> anyhow::Result<()> {
    let rank = function_rank.and_then(|r| r.split('/').next()).and_then(|k| k.parse::<u32>().ok());
    let key = paths::done_flag(root, function_name, rank);

    store_client.put(store_name, store, &key, Bytes::new()).await?;

    if let Some(dir) = local_mirror_dir() {
        let path = PathBuf::from(dir).join(&key);
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let _ = tokio::fs::write(&path, []).await;
    }

    Ok(())
}

fn local_mirror_dir() -> Option<String> {
    std::env::var("FAASR_LOCAL_FILE_SYSTEM_DIR").ok().or_else(|| Some("/tmp".to_string()))
}
