use std::path::PathBuf;

use anyhow::Context;
use tempfile::TempDir;

use crate::errors::FaasrError;
use crate::payload::{
    FunctionType,
    WorkflowDocument,
};

/// The directory and entrypoint file a user function was materialized
/// into, ready for [`crate::executor::execute`] to run. The `TempDir`
/// must stay alive for the lifetime of the child process — dropping it
/// deletes the directory.
pub struct InstalledFunction {
    pub workdir: TempDir,
    pub entrypoint: PathBuf,
}

/// Installs a function's third-party dependencies and fetches its
/// source, the way `faasr_start_invoke_helper.py` shells out to `pip`,
/// `Rscript -e install.packages(...)`, and `git clone` before invoking
/// the user's code. Runs once per invocation, before the sidecar starts.
pub async fn prepare(
    client: &reqwest::Client,
    doc: &WorkflowDocument,
    function_name: &str,
) -> anyhow::Result<InstalledFunction> {
    let workdir = tempfile::Builder::new()
        .prefix("faasr-")
        .tempdir()
        .context("failed to create working directory for user function")?;

    install_pypi_packages(doc).await?;
    install_cran_packages(doc).await?;
    install_github_packages(doc).await?;

    let action = doc
        .action_list
        .get(function_name)
        .ok_or_else(|| FaasrError::unreachable_state(format!("unknown function {function_name}")))?;

    let entrypoint = fetch_function_source(client, doc, function_name, action.function_type, workdir.path()).await?;

    Ok(InstalledFunction { workdir, entrypoint })
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        serde_json::Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

async fn install_pypi_packages(doc: &WorkflowDocument) -> anyhow::Result<()> {
    let Some(value) = &doc.pypi_package_downloads else {
        return Ok(());
    };
    for package in string_list(value) {
        run_install_command("pip", ["install", "--quiet", &package]).await?;
    }
    Ok(())
}

async fn install_cran_packages(doc: &WorkflowDocument) -> anyhow::Result<()> {
    let Some(value) = &doc.function_cran_package else {
        return Ok(());
    };
    for package in string_list(value) {
        let expr = format!("if (!requireNamespace(\"{package}\", quietly = TRUE)) install.packages(\"{package}\")");
        run_install_command("Rscript", ["-e", &expr]).await?;
    }
    Ok(())
}

async fn install_github_packages(doc: &WorkflowDocument) -> anyhow::Result<()> {
    let Some(value) = &doc.function_github_package else {
        return Ok(());
    };
    for spec in string_list(value) {
        run_install_command("pip", ["install", "--quiet", &format!("git+https://github.com/{spec}")]).await?;
    }
    Ok(())
}

async fn run_install_command<const N: usize>(program: &str, args: [&str; N]) -> anyhow::Result<()> {
    let status = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| FaasrError::user_function_failure(format!("failed to spawn {program}")))?;

    if !status.success() {
        return Err(FaasrError::user_function_failure(format!(
            "{program} {} exited with {status}",
            args.join(" ")
        ))
        .into());
    }
    Ok(())
}

/// Resolves `FunctionGitRepo` for `function_name` and fetches its source
/// file into `workdir`, returning the path the executor should run.
async fn fetch_function_source(
    client: &reqwest::Client,
    doc: &WorkflowDocument,
    function_name: &str,
    function_type: FunctionType,
    workdir: &std::path::Path,
) -> anyhow::Result<PathBuf> {
    let extension = match function_type {
        FunctionType::Python => "py",
        FunctionType::R => "R",
    };
    let entrypoint = workdir.join(format!("{function_name}.{extension}"));

    let Some(repo_spec) = doc
        .function_git_repo
        .as_ref()
        .and_then(|v| v.get(function_name).or(Some(v)))
        .and_then(|v| v.as_str())
    else {
        // No repository configured for this function: the user function
        // is expected to already be present on this host's filesystem.
        return Ok(entrypoint);
    };

    let raw_url = format!(
        "https://raw.githubusercontent.com/{repo_spec}/{function_name}.{extension}"
    );
    let resp = client
        .get(&raw_url)
        .header("User-Agent", "faasr-runtime")
        .send()
        .await
        .with_context(|| FaasrError::user_function_failure(format!("failed to fetch {raw_url}")))?;

    if !resp.status().is_success() {
        return Err(FaasrError::user_function_failure(format!(
            "{raw_url} returned {}",
            resp.status()
        ))
        .into());
    }

    let body = resp
        .text()
        .await
        .with_context(|| FaasrError::user_function_failure(format!("failed to read body of {raw_url}")))?;
    tokio::fs::write(&entrypoint, body)
        .await
        .with_context(|| FaasrError::user_function_failure("failed to write function source to disk"))?;

    Ok(entrypoint)
}
