use std::{
    path::PathBuf,
    time::Duration,
};

use clap::Parser;

/// Immutable, process-wide configuration for a single invocation.
///
/// Parsed once in `main` and threaded explicitly into every component
/// that needs it, replacing the shared on-disk JSON flags file the
/// Python original reads from every process (see SPEC_FULL.md section 9,
/// "Global configuration").
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "FaaSr per-action workflow runtime")]
pub struct Config {
    /// Path (owner/repo/branch/file) or URL to the workflow payload.
    #[clap(long, env = "PAYLOAD_URL")]
    pub payload_url: String,

    /// GitHub PAT used to fetch the payload and dispatch GitHub Actions.
    #[clap(long, env = "TOKEN")]
    pub token: Option<String>,

    /// JSON-encoded overlay merged on top of the base payload at startup.
    #[clap(long, env = "OVERWRITTEN", default_value = "{}")]
    pub overwritten: String,

    /// Name of the action this invocation runs; falls back to the
    /// payload's own `FunctionInvoke` field when unset.
    #[clap(long, env = "FUNCTION_INVOKE")]
    pub function_invoke: Option<String>,

    /// `"k/N"` rank this invocation runs as, for a ranked fan-out target.
    #[clap(long, env = "FUNCTION_RANK")]
    pub function_rank: Option<String>,

    /// Skip JSON-schema validation of the fetched payload.
    #[clap(long, env = "FAASR_SKIP_SCHEMA_VALIDATE")]
    pub skip_schema_validate: bool,

    /// Log provider dispatches instead of issuing them.
    #[clap(long, env = "FAASR_SKIP_REAL_TRIGGERS")]
    pub skip_real_triggers: bool,

    /// Skip running the user function (debug mode).
    #[clap(long, env = "FAASR_SKIP_USER_FUNCTION")]
    pub skip_user_function: bool,

    /// Write logs to the local filesystem instead of the logging data store.
    #[clap(long, env = "FAASR_USE_LOCAL_FILE_SYSTEM")]
    pub use_local_file_system: bool,

    /// Root directory used when `use_local_file_system` is set.
    #[clap(long, env = "FAASR_LOCAL_FILE_SYSTEM_DIR", default_value = "/tmp")]
    pub local_file_system_dir: PathBuf,

    /// Loopback port for the RPC sidecar; 0 picks a free ephemeral port.
    #[clap(long, env = "FAASR_SIDECAR_PORT", default_value_t = 0)]
    pub sidecar_port: u16,

    /// How long the executor waits for the sidecar to become ready.
    #[clap(long, env = "FAASR_SIDECAR_READY_TIMEOUT_SECS", default_value_t = 30)]
    pub sidecar_ready_timeout_secs: u64,

    /// Initial back-off for the RSM lock, in seconds.
    #[clap(long, env = "FAASR_LOCK_INITIAL_BACKOFF_SECS", default_value_t = 1)]
    pub lock_initial_backoff_secs: u64,

    /// Exponent at which the RSM lock's back-off stops doubling (2^N cap).
    #[clap(long, env = "FAASR_LOCK_MAX_BACKOFF_EXP", default_value_t = 4)]
    pub lock_max_backoff_exp: u32,

    /// Total attempts before the RSM lock gives up with `LockTimeout`.
    #[clap(long, env = "FAASR_LOCK_MAX_ATTEMPTS", default_value_t = 13)]
    pub lock_max_attempts: u32,
}

impl Config {
    pub fn sidecar_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.sidecar_ready_timeout_secs)
    }

    pub fn lock_initial_backoff(&self) -> Duration {
        Duration::from_secs(self.lock_initial_backoff_secs)
    }
}
