//! Common utilities for the OpenStack API client
//!
//! Provides shared request handling used by the network and compute calls.

pub mod query;

use crate::error::CloudError;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Pagination link from a Neutron collection (`<collection>_links`)
#[derive(Debug, Clone, Deserialize)]
pub struct PageLink {
    pub rel: String,
    pub href: String,
}

/// HTTP client wrapper bound to one service endpoint, with token authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("X-Auth-Token", &self.token)
            .header("Accept", "application/json")
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response, CloudError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::from_status(status, context, body))
    }

    /// Fetch every page of a Neutron collection, following `<collection>_links` `next` hrefs
    pub async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        mut url: String,
        collection: &str,
    ) -> Result<Vec<T>, CloudError> {
        let mut all_results = Vec::new();
        let links_key = format!("{collection}_links");

        loop {
            debug!("Fetching page: {}", url);

            let response = self.request(reqwest::Method::GET, &url).send().await?;
            let response = Self::check(response, &format!("GET {url}")).await?;

            let response_text = response.text().await?;
            let mut page: serde_json::Value = serde_json::from_str(&response_text).map_err(|e| {
                CloudError::Api(format!(
                    "error decoding response body: {} - Response (first 500 chars): {}",
                    e,
                    response_text.chars().take(500).collect::<String>()
                ))
            })?;

            let items = page.get_mut(collection).map(serde_json::Value::take).ok_or_else(|| {
                CloudError::Api(format!("response from {url} has no '{collection}' member"))
            })?;
            let items: Vec<T> = serde_json::from_value(items)?;
            all_results.extend(items);

            let next = page
                .get_mut(&links_key)
                .map(serde_json::Value::take)
                .filter(|v| !v.is_null())
                .map(serde_json::from_value::<Vec<PageLink>>)
                .transpose()?
                .and_then(|links| links.into_iter().find(|l| l.rel == "next"));

            match next {
                Some(link) => url = self.build_url(&link.href),
                None => break,
            }
        }

        Ok(all_results)
    }

    /// GET a single enveloped resource, e.g. `{"server": {...}}`
    pub async fn get<T: DeserializeOwned>(&self, path: &str, member: &str) -> Result<T, CloudError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let response = Self::check(response, &format!("GET {path}")).await?;
        Self::unwrap_member(response, member).await
    }

    /// POST a JSON body and decode the enveloped result
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        member: &str,
    ) -> Result<T, CloudError> {
        let url = self.build_url(path);
        debug!("POST {} with body: {}", url, body);

        let response = self
            .request(reqwest::Method::POST, &url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        let response = Self::check(response, &format!("POST {path}")).await?;
        Self::unwrap_member(response, member).await
    }

    /// PUT a JSON body, discarding the response body
    pub async fn put(&self, path: &str, body: &serde_json::Value) -> Result<(), CloudError> {
        let url = self.build_url(path);
        debug!("PUT {} with body: {}", url, body);

        let response = self
            .request(reqwest::Method::PUT, &url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::check(response, &format!("PUT {path}")).await?;
        Ok(())
    }

    async fn unwrap_member<T: DeserializeOwned>(
        response: reqwest::Response,
        member: &str,
    ) -> Result<T, CloudError> {
        let mut value: serde_json::Value = response.json().await?;
        let inner = value
            .get_mut(member)
            .map(serde_json::Value::take)
            .ok_or_else(|| CloudError::Api(format!("response has no '{member}' member")))?;
        Ok(serde_json::from_value(inner)?)
    }

    /// Build query string from filters
    pub fn build_query_string(&self, filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
