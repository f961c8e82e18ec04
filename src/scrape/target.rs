// Scrape target and the HTTP puller bound to it.

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use anyhow::{Context, bail};
use flate2::read::GzDecoder;
use reqwest::header::{HeaderName, HeaderValue};

use crate::models::ProfileTarget;

/// Endpoint settings for one profile kind, evaluated from the current
/// config when a member starts being scraped.
#[derive(Debug, Clone, Default)]
pub struct PprofConfig {
    pub path: String,
    /// Appended as the `seconds` query parameter when > 0.
    pub seconds: u32,
    pub params: HashMap<String, String>,
    pub header: HashMap<String, String>,
}

/// A single profile endpoint: fixed URL and headers for one
/// (kind, component, address).
pub struct Target {
    pub target: ProfileTarget,
    url: reqwest::Url,
    header: HashMap<String, String>,
}

impl Target {
    pub fn new(
        component: &str,
        address: &str,
        kind: &str,
        scheme: &str,
        cfg: &PprofConfig,
    ) -> anyhow::Result<Self> {
        let mut url = reqwest::Url::parse(&format!("{scheme}://{address}{}", cfg.path))
            .with_context(|| format!("bad target url for {address}{}", cfg.path))?;
        if !cfg.params.is_empty() || cfg.seconds > 0 {
            let mut pairs = url.query_pairs_mut();
            let mut params: Vec<_> = cfg.params.iter().collect();
            params.sort();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
            if cfg.seconds > 0 {
                pairs.append_pair("seconds", &cfg.seconds.to_string());
            }
        }
        Ok(Self {
            target: ProfileTarget {
                kind: kind.to_string(),
                component: component.to_string(),
                address: address.to_string(),
            },
            url,
            header: cfg.header.clone(),
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

/// Pulls one target. The GET request is built once at construction
/// (headers and query never change) and cloned per call with the per-call
/// deadline applied.
pub struct Scraper {
    target: ProfileTarget,
    client: reqwest::Client,
    request: reqwest::Request,
}

impl Scraper {
    pub fn new(target: Target, client: reqwest::Client) -> anyhow::Result<Self> {
        let mut request = reqwest::Request::new(reqwest::Method::GET, target.url.clone());
        for (key, value) in &target.header {
            request.headers_mut().insert(
                HeaderName::from_bytes(key.as_bytes())
                    .with_context(|| format!("bad header name {key}"))?,
                HeaderValue::from_str(value).with_context(|| format!("bad header value {value}"))?,
            );
        }
        Ok(Self {
            target: target.target,
            client,
            request,
        })
    }

    pub fn target(&self) -> &ProfileTarget {
        &self.target
    }

    /// Fetch the profile body into `buf`, transparently gunzipping it.
    /// A body that is not gzip passes through untouched.
    pub async fn scrape(&self, timeout: Duration, buf: &mut Vec<u8>) -> anyhow::Result<()> {
        let mut request = self
            .request
            .try_clone()
            .context("scrape request not cloneable")?;
        *request.timeout_mut() = Some(timeout);

        let resp = self.client.execute(request).await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            bail!("server returned HTTP status {status}");
        }
        let body = resp.bytes().await.context("failed to read body")?;
        append_unzipped(buf, &body);
        Ok(())
    }
}

fn append_unzipped(buf: &mut Vec<u8>, data: &[u8]) {
    let mut decoded = Vec::new();
    if GzDecoder::new(data).read_to_end(&mut decoded).is_ok() {
        buf.extend_from_slice(&decoded);
    } else {
        buf.extend_from_slice(data);
    }
}
