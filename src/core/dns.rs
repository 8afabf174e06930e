use anyhow::Context;
use async_trait::async_trait;

use super::runtime::ServiceAddr;

/// Port of weaveDNS's HTTP API.
pub const WEAVEDNS_HTTP_PORT: u16 = 6785;

/// Name registration service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, container_id: &str, fqdn: &str, ip: &str) -> anyhow::Result<()>;

    async fn deregister(&self, container_id: &str, ip: &str) -> anyhow::Result<()>;
}

/// [`Registrar`] talking to weaveDNS: `PUT /name/<container>/<ip>` with a
/// form-encoded `fqdn`, `DELETE /name/<container>/<ip>` to drop it.
pub struct WeaveDns {
    client: reqwest::Client,
    dns: ServiceAddr,
}

impl WeaveDns {
    pub fn new(dns: ServiceAddr) -> Self {
        Self {
            client: reqwest::Client::new(),
            dns,
        }
    }

    async fn url(&self, container_id: &str, ip: &str) -> anyhow::Result<String> {
        let base = self
            .dns
            .base_url()
            .await
            .context("Failed to locate weaveDNS")?;
        Ok(format!("{base}/name/{container_id}/{ip}"))
    }
}

#[async_trait]
impl Registrar for WeaveDns {
    async fn register(&self, container_id: &str, fqdn: &str, ip: &str) -> anyhow::Result<()> {
        let url = self.url(container_id, ip).await?;
        let res = self
            .client
            .put(&url)
            .form(&[("fqdn", fqdn)])
            .send()
            .await
            .with_context(|| format!("PUT {url}"))?;

        check(res).await
    }

    async fn deregister(&self, container_id: &str, ip: &str) -> anyhow::Result<()> {
        let url = self.url(container_id, ip).await?;
        let res = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("DELETE {url}"))?;

        check(res).await
    }
}

async fn check(res: reqwest::Response) -> anyhow::Result<()> {
    let status = res.status();
    if status.is_success() {
        return Ok(());
    }

    let body = res.text().await.unwrap_or_default();
    anyhow::bail!("weaveDNS returned {status}: {}", body.trim())
}
