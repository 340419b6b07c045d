use anyhow::Context;
use serde_json::{
    Map,
    Value as JsonValue,
};
use uuid::Uuid;

use crate::config::Config;
use crate::dependency_install;
use crate::errors::FaasrError;
use crate::executor::{
    self,
    ExecutionRequest,
};
use crate::fan_in::{
    FanInArbiter,
    Outcome,
};
use crate::graph::Graph;
use crate::lock::LockService;
use crate::log_sink::{
    self,
    LogBuffer,
};
use crate::object_store::ObjectStoreClient;
use crate::payload::{
    fetch,
    schema,
    secrets,
    store_checks,
    Payload,
    WorkflowDocument,
};
use crate::paths;
use crate::scheduler::Scheduler;

/// Runs one action end to end: fetch and validate the payload, check
/// every data store is reachable, decide whether this invocation is the
/// one that should proceed past any fan-in barrier, run the user
/// function, then trigger its successors. This is the single
/// control-flow path every entrypoint (local CLI, GitHub Actions job,
/// Lambda handler, SLURM job script) funnels through. Mirrors the
/// top-level orchestration `faasr_start.py` performs.
pub async fn run(config: &Config, log_buffer: &LogBuffer) -> anyhow::Result<()> {
    let http = reqwest::Client::new();

    let fetched = fetch::fetch_payload(&http, &config.payload_url, config.token.as_deref()).await?;
    let secret_map = secrets::secret_map_from_env();
    let base = secrets::replace_secrets(&fetched, &secret_map);

    if !config.skip_schema_validate {
        schema::validate(&base)?;
    }

    let overlay: Map<String, JsonValue> = serde_json::from_str(&config.overwritten)
        .context(FaasrError::schema_violation("OVERWRITTEN is not a JSON object"))?;
    let payload = Payload::new(fetched.clone(), overlay);

    let doc: WorkflowDocument = serde_json::from_value(base)
        .context(FaasrError::schema_violation("payload does not match the workflow document shape"))?;

    let invocation_id = doc
        .invocation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let store_client = ObjectStoreClient::new();

    let result = run_action(config, &http, &doc, &payload, &invocation_id, &store_client, log_buffer).await;

    // SPEC_FULL.md section 7's logging policy requires every fatal error
    // to land in the per-invocation log object, not just stdout — so a
    // failure anywhere past this point still gets a best-effort flush
    // before the error propagates to `main`'s exit-code mapping.
    if let Err(err) = &result {
        tracing::error!(error = %err, "invocation failed");
        let function_name = config.function_invoke.clone().or_else(|| doc.function_invoke.clone());
        let _ = flush_logs(config, &doc, &store_client, &invocation_id, function_name.as_deref(), log_buffer).await;
    }

    result
}

async fn run_action(
    config: &Config,
    http: &reqwest::Client,
    doc: &WorkflowDocument,
    payload: &Payload,
    invocation_id: &str,
    store_client: &ObjectStoreClient,
    log_buffer: &LogBuffer,
) -> anyhow::Result<()> {
    let graph = Graph::build(doc)?;

    let function_name = config
        .function_invoke
        .clone()
        .or_else(|| payload.get("FunctionInvoke").and_then(JsonValue::as_str).map(str::to_string))
        .or_else(|| doc.function_invoke.clone())
        .ok_or_else(|| FaasrError::unreachable_state("no FunctionInvoke in config or payload"))?;

    let action = doc
        .action_list
        .get(&function_name)
        .ok_or_else(|| FaasrError::unreachable_state(format!("unknown function {function_name}")))?
        .clone();

    // C4: Payload.s3_check — every DataStores entry must be reachable
    // before any coordination object is written.
    let data_stores = store_checks::s3_check(store_client, &doc.data_stores).await?;

    let logging_store_name = doc
        .logging_data_store
        .clone()
        .or_else(|| doc.default_data_store.clone())
        .ok_or_else(|| FaasrError::unreachable_state("no LoggingDataStore or DefaultDataStore configured"))?;
    let logging_store = data_stores
        .get(&logging_store_name)
        .ok_or_else(|| FaasrError::unreachable_state(format!("unknown DataStore {logging_store_name}")))?
        .clone();

    let root = paths::root(doc, invocation_id);

    let predecessors = graph.predecessors(&function_name);

    if predecessors.is_empty() {
        store_checks::init_log_folder(store_client, &logging_store_name, &logging_store, &root).await?;
    }

    let rank_suffix = config.function_rank.clone().or_else(|| action.rank.clone());

    if predecessors.len() > 1 {
        let arbiter = FanInArbiter::new(store_client, LockService::new(store_client, config));
        let outcome = arbiter
            .barrier(&graph, &logging_store_name, &logging_store, &root, &function_name)
            .await?;

        if let Outcome::NotLastTrigger(reason) = outcome {
            tracing::info!(reason = reason.code(), function = %function_name, "not the final trigger at this barrier, exiting cleanly");
            flush_logs(config, doc, store_client, invocation_id, Some(&function_name), log_buffer).await?;
            return Ok(());
        }
    }

    let installed = dependency_install::prepare(http, doc, &function_name).await?;

    let arguments = action.arguments.clone();
    let default_store_name = doc.default_data_store.clone();

    let execution = executor::execute(ExecutionRequest {
        config,
        function_type: action.function_type,
        entrypoint: &installed.entrypoint,
        function_name: &function_name,
        arguments,
        function_rank: rank_suffix,
        store_client,
        data_stores: data_stores.clone(),
        default_store_name,
        logging_store_name: &logging_store_name,
        logging_store: &logging_store,
        root: &root,
        log_buffer: log_buffer.clone(),
    })
    .await?;

    let scheduler = Scheduler::new(http, config, doc);
    scheduler
        .trigger_all(&action, payload, execution.return_value.as_ref())
        .await?;

    flush_logs(config, doc, store_client, invocation_id, Some(&function_name), log_buffer).await?;
    Ok(())
}

/// Flushes the buffered log for this invocation, used both on the
/// normal completion path and, best-effort, on any fatal error —
/// `function_name` is `None` when the failure happened before this
/// invocation's own action was even resolved (e.g. a payload fetch or
/// schema failure), in which case the log lands under a shared
/// `_driver` key instead of `<action>.txt`.
async fn flush_logs(
    config: &Config,
    doc: &WorkflowDocument,
    store_client: &ObjectStoreClient,
    invocation_id: &str,
    function_name: Option<&str>,
    log_buffer: &LogBuffer,
) -> anyhow::Result<()> {
    let function_name = function_name.unwrap_or("_driver");
    let log_name = format!("{invocation_id}-{function_name}.log");

    if config.use_local_file_system {
        return log_sink::flush_to_local_file(log_buffer, &config.local_file_system_dir, &log_name).await;
    }

    let Some(logging_store_name) = doc.logging_data_store.clone().or_else(|| doc.default_data_store.clone())
    else {
        return Ok(());
    };
    let Some(logging_store) = doc.data_stores.get(&logging_store_name) else {
        return Ok(());
    };
    let root = paths::root(doc, invocation_id);
    let log_key = paths::action_log_key(&root, function_name);

    log_sink::flush_to_store(log_buffer, store_client, &logging_store_name, logging_store, &log_key).await
}
