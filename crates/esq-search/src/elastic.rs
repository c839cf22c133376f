//! Elasticsearch client over HTTP

use crate::{Result, SearchClient, SearchError, SearchRequest};
use async_trait::async_trait;
use esq_core::ElasticsearchConfig;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Certificate, Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Longest backend error body kept in [`SearchError::Backend`]
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Elasticsearch `_search` client
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchClient {
    /// Create a new client.
    ///
    /// A configured CA bundle takes precedence over `insecure_skip_verify`.
    /// Unreadable or empty CA material is an error.
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        info!("Creating Elasticsearch client for endpoint: {}", config.url);

        let base_url = Url::parse(&config.url)
            .map_err(|e| SearchError::Config(format!("Invalid Elasticsearch URL {}: {}", config.url, e)))?;

        let mut builder = Client::builder()
            .user_agent(concat!("esq-exporter/", env!("CARGO_PKG_VERSION")));

        if let Some(ca_path) = &config.ca_cert_path {
            let pem = std::fs::read(ca_path).map_err(|e| {
                SearchError::Config(format!(
                    "Failed to read CA certificate {}: {}",
                    ca_path.display(),
                    e
                ))
            })?;

            let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
                SearchError::Config(format!(
                    "Failed to parse CA certificate {}: {}",
                    ca_path.display(),
                    e
                ))
            })?;

            if certs.is_empty() {
                return Err(SearchError::Config(format!(
                    "No certificates found in {}",
                    ca_path.display()
                )));
            }

            debug!("Loaded {} CA certificate(s) from {}", certs.len(), ca_path.display());
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        } else if config.insecure_skip_verify {
            warn!("TLS certificate verification is disabled for {}", config.url);
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(timeout) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        if let Some(api_key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("ApiKey {}", api_key))
                .map_err(|e| SearchError::Config(format!("Invalid API key: {}", e)))?;
            value.set_sensitive(true);

            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| SearchError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// URL of the `_search` endpoint for an optional index
    pub fn search_url(&self, index: Option<&str>) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        match index {
            Some(index) => format!("{}/{}/_search", base, index),
            None => format!("{}/_search", base),
        }
    }
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    async fn execute(&self, request: &SearchRequest) -> Result<Value> {
        let url = self.search_url(request.index.as_deref());
        debug!("Executing search at: {}", url);

        let mut builder = self
            .client
            .post(&url)
            .query(&[("track_total_hits", "true")])
            .json(&request.body);

        if let Some(username) = &self.username {
            builder = builder.basic_auth(username, self.password.as_deref());
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        trace!("Raw response from {} ({}): {}", url, status, text);

        if !status.is_success() {
            return Err(SearchError::Backend {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| SearchError::Decode(format!("Invalid JSON from {}: {}", url, e)))
    }
}
