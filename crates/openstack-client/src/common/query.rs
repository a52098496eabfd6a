//! Query utilities for the Networking API
//!
//! Provides helpers for building filtered collection queries.

use crate::common::HttpClient;
use crate::error::CloudError;
use serde::de::DeserializeOwned;

/// List a Neutron collection with optional filtering, fetching all pages
pub async fn query_resources<T: DeserializeOwned>(
    http: &HttpClient,
    collection: &str,
    filters: &[(&str, &str)],
) -> Result<Vec<T>, CloudError> {
    let mut url = format!("/v2.0/{}", collection);

    if !filters.is_empty() {
        let query_string = http.build_query_string(filters);
        url = format!("{}?{}", url, query_string);
    }

    http.fetch_all_pages(http.build_url(&url), collection).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_string_encodes_keys_and_values() {
        let http = HttpClient::new(reqwest::Client::new(), "http://neutron:9696/".to_string(), "t".to_string());
        let query = http.build_query_string(&[("router:external", "true"), ("name", "a b")]);
        assert_eq!(query, "router%3Aexternal=true&name=a%20b");
        assert_eq!(http.base_url(), "http://neutron:9696");
    }

    #[test]
    fn test_build_url_keeps_absolute_links() {
        let http = HttpClient::new(reqwest::Client::new(), "http://neutron:9696".to_string(), "t".to_string());
        assert_eq!(http.build_url("/v2.0/ports"), "http://neutron:9696/v2.0/ports");
        assert_eq!(
            http.build_url("http://other:9696/v2.0/ports?marker=x"),
            "http://other:9696/v2.0/ports?marker=x"
        );
    }
}
