use clap::Parser;

use faasr_runtime::config::Config;
use faasr_runtime::driver;
use faasr_runtime::errors::downcast_kind;
use faasr_runtime::log_sink;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    let log_buffer = log_sink::init(&config);

    match driver::run(&config, &log_buffer).await {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            tracing::error!(error = %err, "invocation failed");
            let code = downcast_kind(&err).map(|kind| kind.exit_code()).unwrap_or(1);
            std::process::exit(code);
        }
    }
}
