use anyhow::Context;
use async_trait::async_trait;
use ipnet::Ipv4Net;

use super::Allocator;
use crate::core::runtime::ServiceAddr;

/// Port of the weave router's HTTP API.
pub const WEAVE_HTTP_PORT: u16 = 6784;

/// [`Allocator`] backed by the weave router's IPAM.
///
/// `POST /ip/<endpoint>` answers with the leased address in CIDR notation,
/// `DELETE /ip/<endpoint>` gives it back.
pub struct WeaveIpam {
    client: reqwest::Client,
    router: ServiceAddr,
}

impl WeaveIpam {
    pub fn new(router: ServiceAddr) -> Self {
        Self {
            client: reqwest::Client::new(),
            router,
        }
    }

    async fn url(&self, endpoint_id: &str) -> anyhow::Result<String> {
        let base = self
            .router
            .base_url()
            .await
            .context("Failed to locate the weave router")?;
        Ok(format!("{base}/ip/{endpoint_id}"))
    }
}

#[async_trait]
impl Allocator for WeaveIpam {
    async fn allocate(&self, endpoint_id: &str) -> anyhow::Result<Ipv4Net> {
        let url = self.url(endpoint_id).await?;
        let res = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            anyhow::bail!("weave IPAM returned {status}: {}", body.trim());
        }

        parse_cidr(&body)
    }

    async fn release(&self, endpoint_id: &str) -> anyhow::Result<()> {
        let url = self.url(endpoint_id).await?;
        let res = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("DELETE {url}"))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("weave IPAM returned {status}: {}", body.trim());
        }

        Ok(())
    }
}

fn parse_cidr(body: &str) -> anyhow::Result<Ipv4Net> {
    body.trim()
        .parse::<Ipv4Net>()
        .with_context(|| format!("Invalid CIDR from IPAM: {:?}", body.trim()))
}
