use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

/// One entry of `ActionList`: a single node of the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "FunctionName")]
    pub function_name: String,
    #[serde(rename = "Type")]
    pub function_type: FunctionType,
    #[serde(rename = "FaaSServer")]
    pub faas_server: String,
    #[serde(rename = "InvokeNext", default)]
    pub invoke_next: InvokeNext,
    #[serde(rename = "Arguments", default)]
    pub arguments: JsonValue,
    #[serde(rename = "Resources", default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    /// `"k/N"`, e.g. `"1/3"` for the first of three ranked replicas.
    #[serde(rename = "Rank", default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    #[serde(
        rename = "UseSecretStore",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub use_secret_store: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionType {
    Python,
    R,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<u32>,
    #[serde(rename = "CPUsPerTask", default, skip_serializing_if = "Option::is_none")]
    pub cpus_per_task: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    #[serde(rename = "TimeLimit", default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
    #[serde(
        rename = "WorkingDirectory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub working_directory: Option<String>,
}

/// `InvokeNext` mixes plain names, rank-suffixed names, and conditional
/// maps. Model as a tagged variant per SPEC_FULL.md section 9
/// ("Recursive conditional expansion"): a single entry is either a plain
/// successor string (`"f"` or `"f(N)"`) or a map from stringified return
/// value to a nested list of successors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvokeNext(pub Vec<InvokeNextEntry>);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvokeNextEntry {
    Plain(String),
    Conditional(BTreeMap<String, Vec<InvokeNextEntry>>),
}

impl InvokeNext {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_conditional(&self) -> bool {
        self.0
            .iter()
            .any(|entry| matches!(entry, InvokeNextEntry::Conditional(_)))
    }
}

/// One entry of `ComputeServers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeServer {
    #[serde(rename = "FaaSType")]
    pub faas_type: FaaSType,
    #[serde(flatten)]
    pub fields: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaaSType {
    GitHubActions,
    Lambda,
    OpenWhisk,
    SLURM,
}

impl ComputeServer {
    /// True if secrets (`ComputeServers`, `DataStores`) must be stripped
    /// from the overlay before dispatching to this server.
    pub fn use_secret_store(&self) -> bool {
        self.fields
            .get("UseSecretStore")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(JsonValue::as_str)
    }
}

/// One entry of `DataStores`: an S3-compatible object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataStore {
    #[serde(rename = "Endpoint")]
    pub endpoint: String,
    #[serde(rename = "Region", default)]
    pub region: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "AccessKey", default)]
    pub access_key: String,
    #[serde(rename = "SecretKey", default)]
    pub secret_key: String,
    #[serde(rename = "Anonymous", default)]
    pub anonymous: Option<String>,
}

impl DataStore {
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// The workflow document as read from the configured GitHub raw URL.
/// Field names match the wire JSON exactly (PascalCase), per SPEC_FULL.md
/// section 3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(rename = "ActionList", default)]
    pub action_list: BTreeMap<String, Action>,
    #[serde(rename = "ComputeServers", default)]
    pub compute_servers: BTreeMap<String, ComputeServer>,
    #[serde(rename = "DataStores", default)]
    pub data_stores: BTreeMap<String, DataStore>,
    #[serde(rename = "DefaultDataStore", default, skip_serializing_if = "Option::is_none")]
    pub default_data_store: Option<String>,
    #[serde(rename = "LoggingDataStore", default, skip_serializing_if = "Option::is_none")]
    pub logging_data_store: Option<String>,
    #[serde(rename = "FaaSrLog", default, skip_serializing_if = "Option::is_none")]
    pub faasr_log: Option<String>,
    #[serde(rename = "InvocationID", default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(rename = "FunctionInvoke", default, skip_serializing_if = "Option::is_none")]
    pub function_invoke: Option<String>,
    #[serde(rename = "FunctionRank", default, skip_serializing_if = "Option::is_none")]
    pub function_rank: Option<u32>,
    #[serde(rename = "PackageImports", default, skip_serializing_if = "Option::is_none")]
    pub package_imports: Option<JsonValue>,
    #[serde(rename = "FunctionGitRepo", default, skip_serializing_if = "Option::is_none")]
    pub function_git_repo: Option<JsonValue>,
    #[serde(
        rename = "PyPIPackageDownloads",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pypi_package_downloads: Option<JsonValue>,
    #[serde(
        rename = "FunctionCRANPackage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub function_cran_package: Option<JsonValue>,
    #[serde(
        rename = "FunctionGitHubPackage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub function_github_package: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}
