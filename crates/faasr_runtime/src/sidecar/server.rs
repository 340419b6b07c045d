use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{
        Query,
        State,
    },
    http::StatusCode,
    routing::{
        get,
        post,
    },
    Json,
    Router,
};
use serde::Deserialize;
use serde_json::{
    json,
    Value as JsonValue,
};
use tokio::net::TcpListener;
use tokio::sync::{
    Mutex,
    Notify,
};

use crate::log_sink::LogBuffer;
use crate::object_store::ObjectStoreClient;
use crate::payload::DataStore;

/// Shared state between the sidecar's HTTP handlers and the executor
/// that drives the child process. The user function talks to this
/// server over loopback HTTP only — it never shares memory with the
/// executor, per SPEC_FULL.md section 4.7's three-process split.
struct SidecarState {
    function_rank: Option<String>,
    store_client: Arc<ObjectStoreClient>,
    data_stores: BTreeMap<String, DataStore>,
    default_store_name: Option<String>,
    log_buffer: LogBuffer,
    return_value: Mutex<Option<JsonValue>>,
    error: Mutex<bool>,
    message: Mutex<Option<String>>,
    exit: Arc<Notify>,
}

/// A running sidecar: the bound address and a handle used to ask it to
/// stop once the child process has finished.
pub struct Sidecar {
    pub port: u16,
    exit: Arc<Notify>,
    join: tokio::task::JoinHandle<()>,
    state: Arc<SidecarState>,
}

/// Everything the sidecar needs besides the port, grouped so
/// `Sidecar::start`'s signature doesn't grow a parameter every time the
/// user function gains a new capability.
pub struct SidecarContext {
    pub function_rank: Option<String>,
    pub store_client: Arc<ObjectStoreClient>,
    pub data_stores: BTreeMap<String, DataStore>,
    pub default_store_name: Option<String>,
    pub log_buffer: LogBuffer,
}

impl Sidecar {
    /// Starts the sidecar on `port` (0 picks a free ephemeral port) and
    /// returns once it is bound and accepting connections — not once the
    /// user function has called `/faasr-echo`; readiness polling from
    /// the far side is the executor's job, see [`super::client`].
    pub async fn start(port: u16, ctx: SidecarContext) -> anyhow::Result<Self> {
        let exit = Arc::new(Notify::new());
        let state = Arc::new(SidecarState {
            function_rank: ctx.function_rank,
            store_client: ctx.store_client,
            data_stores: ctx.data_stores,
            default_store_name: ctx.default_store_name,
            log_buffer: ctx.log_buffer,
            return_value: Mutex::new(None),
            error: Mutex::new(false),
            message: Mutex::new(None),
            exit: exit.clone(),
        });

        let app = Router::new()
            .route("/faasr-echo", get(faasr_echo))
            .route("/faasr-action", post(faasr_action))
            .route("/faasr-return", post(faasr_return))
            .route("/faasr-get-return", get(faasr_get_return))
            .route("/faasr-exit", post(faasr_exit))
            .with_state(state.clone());

        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr).await?;
        let bound_port = listener.local_addr()?.port();

        let shutdown = exit.clone();
        let join = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await;
        });

        Ok(Self {
            port: bound_port,
            exit,
            join,
            state,
        })
    }

    /// Returns the value the user function posted to `/faasr-return`,
    /// `None` if it never called it.
    pub async fn return_value(&self) -> Option<JsonValue> {
        self.state.return_value.lock().await.clone()
    }

    /// Whether the user function reported failure via `/faasr-exit`,
    /// and the message it gave, if any.
    pub async fn error(&self) -> (bool, Option<String>) {
        (*self.state.error.lock().await, self.state.message.lock().await.clone())
    }

    /// Stops accepting connections and waits for the server task to
    /// finish. Always called, including on the user function's failure
    /// path, so no sidecar process ever outlives its invocation.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.exit.notify_one();
        self.join.await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct EchoQuery {
    message: Option<String>,
}

/// Readiness probe: echoes back whatever `message` the caller sent, the
/// way a liveness poll confirms it is talking to *this* invocation's
/// sidecar and not a stale one left over on the same port.
async fn faasr_echo(Query(query): Query<EchoQuery>) -> String {
    query.message.unwrap_or_default()
}

#[derive(Deserialize)]
struct ActionRequest {
    #[serde(rename = "ProcedureID")]
    procedure_id: String,
    #[serde(rename = "Arguments", default)]
    arguments: JsonValue,
}

async fn faasr_action(
    State(state): State<Arc<SidecarState>>,
    Json(req): Json<ActionRequest>,
) -> (StatusCode, Json<JsonValue>) {
    match dispatch_procedure(&state, &req.procedure_id, &req.arguments).await {
        Ok(result) => (StatusCode::OK, Json(result)),
        Err(err) => {
            let message = err.to_string();
            tracing::error!(procedure = %req.procedure_id, error = %message, "faasr-action failed");
            *state.error.lock().await = true;
            *state.message.lock().await = Some(message.clone());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "Error": true, "Message": message })))
        }
    }
}

fn arg_str<'a>(arguments: &'a JsonValue, key: &str) -> anyhow::Result<&'a str> {
    arguments
        .get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow::anyhow!("faasr-action Arguments missing string field {key}"))
}

async fn resolve_store<'a>(
    state: &'a SidecarState,
    arguments: &JsonValue,
) -> anyhow::Result<(&'a str, &'a DataStore)> {
    let store_name = arguments
        .get("StoreName")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .or_else(|| state.default_store_name.clone())
        .ok_or_else(|| anyhow::anyhow!("no StoreName given and no DefaultDataStore configured"))?;
    state
        .data_stores
        .get_key_value(&store_name)
        .map(|(name, store)| (name.as_str(), store))
        .ok_or_else(|| anyhow::anyhow!("unknown DataStore {store_name}"))
}

/// Splits a `"k/N"` rank string into `(Rank, MaxRank)`, `(None, None)`
/// on absence or a malformed value, mirroring `rank.py`'s
/// `faasr_rank`.
fn parse_rank(rank: Option<&str>) -> (Option<u32>, Option<u32>) {
    let Some(rank) = rank else {
        return (None, None);
    };
    let mut parts = rank.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(k), Some(n), None) => match (k.parse::<u32>(), n.parse::<u32>()) {
            (Ok(k), Ok(n)) => (Some(k), Some(n)),
            _ => (None, None),
        },
        _ => (None, None),
    }
}

/// Dispatches one `ProcedureID` to its implementation. Unknown
/// procedures are a fatal error per SPEC_FULL.md section 4.6's RPC
/// sidecar table.
async fn dispatch_procedure(
    state: &SidecarState,
    procedure_id: &str,
    arguments: &JsonValue,
) -> anyhow::Result<JsonValue> {
    match procedure_id {
        "faasr_log" => {
            let message = arg_str(arguments, "Message")?;
            tracing::info!(target: "faasr_user_function", message, "user function log");
            let _ = &state.log_buffer;
            Ok(json!({ "Ok": true }))
        }
        "faasr_put_file" => {
            let (store_name, store) = resolve_store(state, arguments).await?;
            let local_file = arg_str(arguments, "LocalFile")?;
            let remote_file = arg_str(arguments, "RemoteFile")?;
            let body = tokio::fs::read(local_file).await?;
            state
                .store_client
                .put(store_name, store, remote_file, bytes::Bytes::from(body))
                .await?;
            Ok(json!({ "Ok": true }))
        }
        "faasr_get_file" => {
            let (store_name, store) = resolve_store(state, arguments).await?;
            let remote_file = arg_str(arguments, "RemoteFile")?;
            let local_file = arg_str(arguments, "LocalFile")?;
            let body = state.store_client.get(store_name, store, remote_file).await?;
            tokio::fs::write(local_file, &body).await?;
            Ok(json!({ "Ok": true }))
        }
        "faasr_delete_file" => {
            let (store_name, store) = resolve_store(state, arguments).await?;
            let remote_file = arg_str(arguments, "RemoteFile")?;
            state.store_client.delete(store_name, store, remote_file).await?;
            Ok(json!({ "Ok": true }))
        }
        "faasr_get_folder_list" => {
            let (store_name, store) = resolve_store(state, arguments).await?;
            let prefix = arg_str(arguments, "FolderName")?;
            let keys = state.store_client.list(store_name, store, prefix).await?;
            Ok(json!({ "Keys": keys }))
        }
        "faasr_rank" => {
            let (rank, max_rank) = parse_rank(state.function_rank.as_deref());
            Ok(json!({ "Rank": rank, "MaxRank": max_rank }))
        }
        "faasr_get_s3_creds" => {
            let (_, store) = resolve_store(state, arguments).await?;
            let anonymous = store.is_anonymous();
            Ok(json!({
                "Bucket": store.bucket,
                "Region": store.region,
                "Endpoint": store.endpoint,
                "SecretKey": if anonymous { None } else { Some(&store.secret_key) },
                "AccessKey": if anonymous { None } else { Some(&store.access_key) },
                "Anonymous": anonymous,
            }))
        }
        other => Err(anyhow::anyhow!("unknown ProcedureID {other}")),
    }
}

#[derive(Deserialize)]
struct ReturnRequest {
    #[serde(rename = "FunctionResult")]
    function_result: JsonValue,
}

async fn faasr_return(
    State(state): State<Arc<SidecarState>>,
    Json(req): Json<ReturnRequest>,
) -> &'static str {
    *state.return_value.lock().await = Some(req.function_result);
    "ok"
}

async fn faasr_get_return(State(state): State<Arc<SidecarState>>) -> Json<JsonValue> {
    let result = state.return_value.lock().await.clone();
    let error = *state.error.lock().await;
    let message = state.message.lock().await.clone();
    Json(json!({
        "FunctionResult": result,
        "Error": error,
        "Message": message,
    }))
}

#[derive(Deserialize, Default)]
struct ExitRequest {
    #[serde(rename = "Error", default)]
    error: bool,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

async fn faasr_exit(
    State(state): State<Arc<SidecarState>>,
    body: Option<Json<ExitRequest>>,
) -> &'static str {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    *state.error.lock().await = req.error;
    *state.message.lock().await = req.message;
    state.exit.notify_one();
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_str_reports_missing_field() {
        let args = json!({ "Other": "x" });
        assert!(arg_str(&args, "Message").is_err());
    }

    #[test]
    fn arg_str_reads_present_field() {
        let args = json!({ "Message": "hello" });
        assert_eq!(arg_str(&args, "Message").unwrap(), "hello");
    }

    #[test]
    fn parse_rank_splits_k_of_n() {
        assert_eq!(parse_rank(Some("2/3")), (Some(2), Some(3)));
    }

    #[test]
    fn parse_rank_is_none_when_absent_or_malformed() {
        assert_eq!(parse_rank(None), (None, None));
        assert_eq!(parse_rank(Some("")), (None, None));
        assert_eq!(parse_rank(Some("not-a-rank")), (None, None));
        assert_eq!(parse_rank(Some("1/2/3")), (None, None));
    }
}
