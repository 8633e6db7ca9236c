//! Consul long-poll source
//!
//! Implements [`HealthSource`] on top of Consul blocking queries:
//!
//! ```text
//! GET /v1/catalog/services?index=<cursor>&wait=<n>s   → service list
//! GET /v1/health/service/<name>?index=...             → instances + checks
//! GET /v1/catalog/nodes?index=...                     → node list
//! GET /v1/health/node/<name>?index=...                → node checks
//! ```
//!
//! The cursor to resume from is read from the `X-Consul-Index` header.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::config::ConsulConfig;
use crate::health::{HealthCheck, Node, ServiceInstance};
use crate::source::{Cursor, HealthSource, INITIAL_CURSOR, Indexed, SourceError, SourceResult};
use crate::util::normalize_address;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Source backed by the Consul HTTP API
pub struct ConsulSource {
    /// HTTP client (reused across requests)
    client: reqwest::Client,

    /// Base address, entity paths are appended segment by segment
    base: Url,

    datacenter: String,

    token: Option<String>,

    /// Wait passed to every blocking query
    wait: Duration,
}

#[derive(Debug, Deserialize)]
struct AgentSelf {
    #[serde(rename = "Config")]
    config: AgentConfig,
}

#[derive(Debug, Deserialize)]
struct AgentConfig {
    #[serde(rename = "Datacenter")]
    datacenter: String,
}

impl ConsulSource {
    /// Build a source for `config`, asking the agent for its datacenter when
    /// none is configured
    pub async fn connect(config: &ConsulConfig) -> SourceResult<Self> {
        let mut source = Self::new(config, config.datacenter.clone().unwrap_or_default())?;

        if source.datacenter.is_empty() {
            source.datacenter = source.agent_datacenter().await?;
            debug!("using agent datacenter {}", source.datacenter);
        }

        Ok(source)
    }

    /// Build a source for an explicit datacenter without contacting Consul
    pub fn new(config: &ConsulConfig, datacenter: String) -> SourceResult<Self> {
        let address = normalize_address(&config.address)
            .ok_or_else(|| SourceError::Request("empty consul address".to_string()))?;
        let base = Url::parse(&address)
            .map_err(|e| SourceError::Request(format!("invalid consul address {address}: {e}")))?;
        let wait = Duration::from_secs(config.wait_secs);

        // Consul adds up to wait/16 of jitter on top of the requested wait.
        let timeout = wait + wait / 16 + Duration::from_secs(10);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base,
            datacenter,
            token: config.token.clone(),
            wait,
        })
    }

    async fn agent_datacenter(&self) -> SourceResult<String> {
        let url = self.endpoint(&["v1", "agent", "self"])?;
        let response = self.authorized(self.client.get(url)).send().await?;
        let response = check_status(response).await?;
        let agent: AgentSelf = response.json().await?;
        Ok(agent.config.datacenter)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    /// Base address extended by `segments`, each percent-encoded on its own
    ///
    /// `.` and `..` can't be carried by a URL path segment and are rejected.
    fn endpoint(&self, segments: &[&str]) -> SourceResult<Url> {
        if let Some(segment) = segments.iter().find(|s| matches!(**s, "." | "..")) {
            return Err(SourceError::Request(format!(
                "{segment:?} can not be used as a path segment"
            )));
        }

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| SourceError::Request(format!("{} can not be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Run one blocking query against the path made of `segments`
    #[instrument(skip(self), level = "trace")]
    async fn blocking_get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        cursor: Cursor,
    ) -> SourceResult<Indexed<T>> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();

        let mut query = vec![
            ("dc", self.datacenter.clone()),
            ("wait", format!("{}s", self.wait.as_secs())),
        ];
        if cursor != INITIAL_CURSOR {
            query.push(("index", cursor.to_string()));
        }

        trace!("requesting {url}");

        let response = self
            .authorized(self.client.get(url).query(&query))
            .send()
            .await?;
        let response = check_status(response).await?;

        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        let body = response.text().await?;
        let data = serde_json::from_str(&body)?;

        let next = match index {
            Some(index) if index < cursor => {
                // The index went backwards (e.g. snapshot restore): start over.
                warn!("consul index went backwards on {path} ({cursor} -> {index}), resetting");
                INITIAL_CURSOR
            }
            Some(index) => index,
            None => {
                warn!("missing {INDEX_HEADER} header on {path}");
                cursor
            }
        };

        Ok(Indexed::new(data, next))
    }
}

async fn check_status(response: reqwest::Response) -> SourceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SourceError::Status {
        code: status.as_u16(),
        message: message.trim().to_string(),
    })
}

#[async_trait]
impl HealthSource for ConsulSource {
    async fn list_services(
        &self,
        cursor: Cursor,
    ) -> SourceResult<Indexed<BTreeMap<String, Vec<String>>>> {
        let res: Indexed<BTreeMap<String, Option<Vec<String>>>> =
            self.blocking_get(&["v1", "catalog", "services"], cursor).await?;
        let services = res
            .data
            .into_iter()
            .map(|(name, tags)| (name, tags.unwrap_or_default()))
            .collect();
        Ok(Indexed::new(services, res.cursor))
    }

    async fn fetch_service(
        &self,
        cursor: Cursor,
        name: &str,
    ) -> SourceResult<Indexed<Vec<ServiceInstance>>> {
        self.blocking_get(&["v1", "health", "service", name], cursor)
            .await
    }

    async fn list_nodes(&self, cursor: Cursor) -> SourceResult<Indexed<Vec<Node>>> {
        self.blocking_get(&["v1", "catalog", "nodes"], cursor).await
    }

    async fn fetch_node(
        &self,
        cursor: Cursor,
        name: &str,
    ) -> SourceResult<Indexed<Vec<HealthCheck>>> {
        self.blocking_get(&["v1", "health", "node", name], cursor)
            .await
    }

    fn datacenter(&self) -> &str {
        &self.datacenter
    }
}
