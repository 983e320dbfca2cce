//! Kubernetes Secret backend

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

use super::{ReadinessCheck, SecretRecord, SecretStore};
use crate::kube_utils::{poll_until, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::{Error, Result};

impl From<Secret> for SecretRecord {
    fn from(secret: Secret) -> Self {
        Self {
            name: secret.metadata.name.unwrap_or_default(),
            namespace: secret.metadata.namespace.unwrap_or_default(),
            data: secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect(),
            labels: secret.metadata.labels.unwrap_or_default(),
            annotations: secret.metadata.annotations.unwrap_or_default(),
        }
    }
}

impl From<&SecretRecord> for Secret {
    fn from(record: &SecretRecord) -> Self {
        let non_empty = |m: &BTreeMap<String, String>| (!m.is_empty()).then(|| m.clone());
        Secret {
            metadata: ObjectMeta {
                name: Some(record.name.clone()),
                namespace: Some(record.namespace.clone()),
                labels: non_empty(&record.labels),
                annotations: non_empty(&record.annotations),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(
                record
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            ..Default::default()
        }
    }
}

/// Secret store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
    timeout: Duration,
    poll_interval: Duration,
}

impl KubeSecretStore {
    /// Create a store with default wait bounds
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the wait bounds used for deletion and readiness
    pub fn with_wait(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<SecretRecord>> {
        Ok(self.api(namespace).get_opt(name).await?.map(SecretRecord::from))
    }

    async fn create(&self, record: SecretRecord) -> Result<SecretRecord> {
        let created = self
            .api(&record.namespace)
            .create(&PostParams::default(), &Secret::from(&record))
            .await?;
        Ok(SecretRecord::from(created))
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        let api = self.api(namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(secret = %format!("{}/{}", namespace, name), "Secret already absent");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        poll_until(
            self.timeout,
            self.poll_interval,
            format!("Timeout waiting for secret {}/{} to be deleted", namespace, name),
            || {
                let api = api.clone();
                async move { Ok::<bool, Error>(api.get_opt(name).await?.is_none()) }
            },
        )
        .await
    }

    async fn patch_annotations(
        &self,
        name: &str,
        namespace: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": { "annotations": annotations }
        });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn wait_until_ready(
        &self,
        name: &str,
        namespace: &str,
        check: ReadinessCheck,
    ) -> Result<()> {
        let api = self.api(namespace);
        let check = &check;
        poll_until(
            self.timeout,
            self.poll_interval,
            format!("Timeout waiting for secret {}/{} to be ready", namespace, name),
            || {
                let api = api.clone();
                async move {
                    let ready = api
                        .get_opt(name)
                        .await?
                        .map(SecretRecord::from)
                        .is_some_and(|record| check(&record));
                    Ok::<bool, Error>(ready)
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_converts_to_opaque_secret() {
        let record = SecretRecord::new("key-secret", "ns1")
            .with_data("ca.key", b"key".to_vec())
            .with_labels(&BTreeMap::from([(
                "strimzi.io/cluster".to_string(),
                "my-cluster".to_string(),
            )]));

        let secret = Secret::from(&record);
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(secret.metadata.name.as_deref(), Some("key-secret"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("ns1"));
        assert!(secret.metadata.annotations.is_none());
        assert_eq!(
            secret.data.as_ref().and_then(|d| d.get("ca.key")),
            Some(&ByteString(b"key".to_vec()))
        );

        let back = SecretRecord::from(secret);
        assert_eq!(back, record);
    }

    #[test]
    fn secret_without_metadata_maps_to_empty_record() {
        let record = SecretRecord::from(Secret::default());
        assert!(record.name.is_empty());
        assert!(record.data.is_empty());
        assert!(record.annotations.is_empty());
    }
}
