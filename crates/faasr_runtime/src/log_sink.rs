use std::io;
use std::path::Path;
use std::sync::{
    Arc,
    Mutex,
};

use bytes::Bytes;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::object_store::ObjectStoreClient;
use crate::payload::DataStore;

/// An in-memory mirror of everything written to the structured log,
/// flushed to the logging data store (or local filesystem, in debug
/// runs) once the invocation finishes. Mirrors `log.py`'s behavior of
/// appending every action's console output to one shared log object per
/// invocation, except each entry here is already structured JSON instead
/// of raw text.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().expect("log buffer mutex poisoned").clone()
    }
}

pub struct LogBufferWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("log buffer mutex poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter(self.0.clone())
    }
}

/// Installs the process-wide `tracing` subscriber: structured JSON to
/// stdout (for local/CI visibility, the way
/// `local_backend`'s entrypoint initializes logging) plus a second copy
/// into an in-memory buffer this invocation flushes to the configured
/// log sink once it finishes.
pub fn init(config: &Config) -> LogBuffer {
    let buffer = LogBuffer::new();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = tracing_subscriber::fmt::layer().json().with_target(true);
    let buffer_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(buffer.clone());

    let _ = config;
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(buffer_layer)
        .try_init();

    buffer
}

/// Flushes the buffered log to `FAASR_LOCAL_FILE_SYSTEM_DIR` instead of
/// the logging data store, used when `FAASR_USE_LOCAL_FILE_SYSTEM` is set.
pub async fn flush_to_local_file(buffer: &LogBuffer, dir: &Path, log_name: &str) -> anyhow::Result<()> {
    let path = dir.join(log_name);
    tokio::fs::write(path, buffer.contents()).await?;
    Ok(())
}

/// Flushes the buffered log to the `LoggingDataStore`/`FaaSrLog` object
/// named in the workflow document.
pub async fn flush_to_store(
    buffer: &LogBuffer,
    store_client: &ObjectStoreClient,
    store_name: &str,
    store: &DataStore,
    log_key: &str,
) -> anyhow::Result<()> {
    store_client
        .put(store_name, store, log_key, Bytes::from(buffer.contents()))
        .await
}
