//! `s3_check` and `init_log_folder`, the two object-store-facing
//! validations [`crate::payload::Payload`] performs before an invocation
//! is allowed to touch any coordination state. Grounded in
//! `faasr_payload.py`'s `check_data_store` and `init_log_folder`.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::errors::FaasrError;
use crate::object_store::ObjectStoreClient;
use crate::payload::DataStore;

/// Validates every `DataStores` entry: `Endpoint` must begin with
/// `http`, an empty `Region` defaults to `us-east-1`, and the bucket
/// must actually be reachable. `Anonymous == "true"` skips credentials
/// but still requires a successful `head_bucket` (SPEC_FULL.md section
/// 9, "Open questions"). Fatal on the first failing store.
pub async fn s3_check(
    store_client: &ObjectStoreClient,
    data_stores: &BTreeMap<String, DataStore>,
) -> anyhow::Result<BTreeMap<String, DataStore>> {
    let mut normalized = BTreeMap::new();

    for (name, store) in data_stores {
        if !store.endpoint.starts_with("http") {
            return Err(FaasrError::data_store_unreachable(format!(
                "DataStores.{name}.Endpoint {:?} does not begin with http",
                store.endpoint
            ))
            .into());
        }

        let mut store = store.clone();
        if store.region.is_empty() {
            store.region = "us-east-1".to_string();
        }

        store_client.head_bucket(name, &store).await?;
        normalized.insert(name.clone(), store);
    }

    Ok(normalized)
}

/// Ensures the log folder for this invocation does not already exist,
/// then creates its marker object. Called only at the source node (the
/// unique action with no predecessors) — every other node relies on the
/// fan-in barrier instead. Aborts with `InvocationAlreadyExists` if any
/// object is already present under the invocation's root prefix, which
/// is the runtime's only defense against re-running a completed
/// workflow from scratch.
pub async fn init_log_folder(
    store_client: &ObjectStoreClient,
    store_name: &str,
    store: &DataStore,
    root: &str,
) -> anyhow::Result<()> {
    let existing = store_client.list(store_name, store, &format!("{root}/")).await?;
    if !existing.is_empty() {
        return Err(FaasrError::invocation_already_exists(format!(
            "objects already exist under {root}/"
        ))
        .into());
    }

    store_client
        .put(store_name, store, &crate::paths::marker_key(root), Bytes::new())
        .await
}
