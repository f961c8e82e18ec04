// Topology client over the metadata service's HTTP API.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use crate::config::Security;
use crate::models::MemberInfo;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of cluster membership, one getter per role family.
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn fetch_node_topology(&self) -> anyhow::Result<Vec<MemberInfo>>;
    async fn fetch_metadata_topology(&self) -> anyhow::Result<Vec<MemberInfo>>;
    /// Storage instances, split into (primary, secondary) engines.
    async fn fetch_storage_topology(&self) -> anyhow::Result<(Vec<MemberInfo>, Vec<MemberInfo>)>;
}

pub struct ClusterClient {
    base_url: String,
    client: reqwest::Client,
}

impl ClusterClient {
    pub fn new(pd_address: &str, scheme: &str, security: &Security) -> anyhow::Result<Self> {
        let client = security
            .http_client_builder()?
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("build topology client")?;
        Ok(Self {
            base_url: format!("{scheme}://{pd_address}"),
            client,
        })
    }

    async fn get_members(&self, path: &str) -> anyhow::Result<Vec<MemberInfo>> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetch {url}"))?;
        anyhow::ensure!(
            resp.status().is_success(),
            "topology endpoint {} returned {}",
            url,
            resp.status()
        );
        resp.json().await.with_context(|| format!("decode {url}"))
    }
}

#[async_trait]
impl TopologySource for ClusterClient {
    async fn fetch_node_topology(&self) -> anyhow::Result<Vec<MemberInfo>> {
        self.get_members("/topology/database").await
    }

    async fn fetch_metadata_topology(&self) -> anyhow::Result<Vec<MemberInfo>> {
        self.get_members("/topology/metadata").await
    }

    async fn fetch_storage_topology(&self) -> anyhow::Result<(Vec<MemberInfo>, Vec<MemberInfo>)> {
        let primary = self.get_members("/topology/storage").await?;
        let secondary = self.get_members("/topology/replica").await?;
        Ok((primary, secondary))
    }
}
