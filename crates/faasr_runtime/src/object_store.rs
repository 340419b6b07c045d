use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::errors::FaasrError;
use crate::payload::DataStore;

/// Builds and caches one `aws-sdk-s3` client per named `DataStores`
/// entry, the way `aws_s3::storage::S3Storage` is constructed per store
/// rather than once for the whole process — but without the generic
/// `Runtime` indirection, since this runtime only ever talks to S3 from
/// a single tokio process.
#[derive(Default)]
pub struct ObjectStoreClient {
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl ObjectStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client_for(&self, store_name: &str, store: &DataStore) -> anyhow::Result<Arc<Client>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(store_name) {
            return Ok(client.clone());
        }

        let credentials = if store.is_anonymous() {
            None
        } else {
            Some(Credentials::new(
                store.access_key.clone(),
                store.secret_key.clone(),
                None,
                None,
                "faasr-runtime",
            ))
        };

        let mut builder = aws_sdk_s3::config::Builder::new()
            .region(Region::new(store.region.clone()))
            .endpoint_url(&store.endpoint)
            .force_path_style(true);
        if let Some(credentials) = credentials {
            builder = builder.credentials_provider(credentials);
        }

        let client = Arc::new(Client::from_conf(builder.build()));
        clients.insert(store_name.to_string(), client.clone());
        Ok(client)
    }

    pub async fn put(
        &self,
        store_name: &str,
        store: &DataStore,
        key: &str,
        body: Bytes,
    ) -> anyhow::Result<()> {
        let client = self.client_for(store_name, store).await?;
        client
            .put_object()
            .bucket(&store.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| {
                FaasrError::data_store_unreachable(format!(
                    "put {key} in {store_name}/{}",
                    store.bucket
                ))
            })?;
        Ok(())
    }

    pub async fn get(&self, store_name: &str, store: &DataStore, key: &str) -> anyhow::Result<Bytes> {
        let client = self.client_for(store_name, store).await?;
        let output = client
            .get_object()
            .bucket(&store.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                FaasrError::data_store_unreachable(format!(
                    "get {key} from {store_name}/{}",
                    store.bucket
                ))
            })?;
        let bytes = output
            .body
            .collect()
            .await
            .with_context(|| FaasrError::data_store_unreachable(format!("reading body of {key}")))?
            .into_bytes();
        Ok(bytes)
    }

    /// Checks that `store`'s bucket exists and is reachable with the
    /// configured credentials, used by `s3_check` to validate every
    /// `DataStores` entry before any coordination object is written.
    pub async fn head_bucket(&self, store_name: &str, store: &DataStore) -> anyhow::Result<()> {
        let client = self.client_for(store_name, store).await?;
        client
            .head_bucket()
            .bucket(&store.bucket)
            .send()
            .await
            .with_context(|| {
                FaasrError::data_store_unreachable(format!(
                    "head_bucket {store_name}/{}",
                    store.bucket
                ))
            })?;
        Ok(())
    }

    pub async fn exists(&self, store_name: &str, store: &DataStore, key: &str) -> anyhow::Result<bool> {
        let client = self.client_for(store_name, store).await?;
        match client.head_object().bucket(&store.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(err).with_context(|| {
                        FaasrError::data_store_unreachable(format!(
                            "head {key} in {store_name}/{}",
                            store.bucket
                        ))
                    })
                }
            }
        }
    }

    pub async fn delete(&self, store_name: &str, store: &DataStore, key: &str) -> anyhow::Result<()> {
        let client = self.client_for(store_name, store).await?;
        client
            .delete_object()
            .bucket(&store.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                FaasrError::data_store_unreachable(format!(
                    "delete {key} from {store_name}/{}",
                    store.bucket
                ))
            })?;
        Ok(())
    }

    /// Lists every key under `prefix`, used by the RSM lock to discover
    /// rival candidate lockfiles and by the fan-in arbiter to discover
    /// done-flags.
    pub async fn list(
        &self,
        store_name: &str,
        store: &DataStore,
        prefix: &str,
    ) -> anyhow::Result<Vec<String>> {
        let client = self.client_for(store_name, store).await?;
        let mut keys = Vec::new();
        let mut continuation = None;
        loop {
            let mut req = client
                .list_objects_v2()
                .bucket(&store.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let output = req.send().await.with_context(|| {
                FaasrError::data_store_unreachable(format!(
                    "list {prefix} in {store_name}/{}",
                    store.bucket
                ))
            })?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            if output.is_truncated().unwrap_or(false) {
                continuation = output.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(keys)
    }
}
