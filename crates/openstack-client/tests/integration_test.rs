//! Integration tests for the OpenStack client
//!
//! These tests require a reachable OpenStack deployment.
//! Set OS_NETWORK_URL, OS_COMPUTE_URL and OS_AUTH_TOKEN environment variables to run.

use openstack_client::{CloudNetworkGateway, OpenStackClient};
use std::time::Duration;

fn live_client() -> OpenStackClient {
    let network_url = std::env::var("OS_NETWORK_URL")
        .unwrap_or_else(|_| "http://localhost:9696".to_string());
    let compute_url = std::env::var("OS_COMPUTE_URL")
        .unwrap_or_else(|_| "http://localhost:8774/v2.1".to_string());
    let token = std::env::var("OS_AUTH_TOKEN")
        .expect("OS_AUTH_TOKEN environment variable must be set");

    OpenStackClient::new(network_url, compute_url, token, Duration::from_secs(30))
        .expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running OpenStack deployment
async fn test_validate_token() {
    let client = live_client();
    client.validate_token().await.expect("Token validation failed");
}

#[tokio::test]
#[ignore]
async fn test_list_external_networks_and_subnets() {
    let client = live_client();

    let networks = client.list_external_networks().await
        .expect("Failed to list external networks");
    assert!(networks.iter().all(|n| n.router_external));

    for network in &networks {
        let subnets = client.list_subnets(&network.id).await
            .expect("Failed to list subnets");
        println!("Network {} has {} subnets", network.id, subnets.len());
        assert!(subnets.iter().all(|s| s.network_id == network.id));
    }
}

#[tokio::test]
#[ignore]
async fn test_list_floating_ips_and_find_each() {
    let client = live_client();

    let fips = client.list_floating_ips().await
        .expect("Failed to list floating IPs");
    println!("Found {} floating IPs", fips.len());

    if let Some(first) = fips.first() {
        let address = first.floating_ip_address.parse().expect("cloud returned a malformed address");
        let found = client.find_floating_ip(address).await
            .expect("Failed to find floating IP");
        assert_eq!(found.map(|f| f.id), Some(first.id.clone()));
    }
}

#[tokio::test]
#[ignore]
async fn test_list_ports() {
    let client = live_client();

    let ports = client.list_ports().await
        .expect("Failed to list ports");
    println!("Found {} ports", ports.len());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_an_http_error() {
    let client = OpenStackClient::new(
        "http://127.0.0.1:9".to_string(),
        "http://127.0.0.1:9/v2.1".to_string(),
        "token".to_string(),
        Duration::from_secs(2),
    )
    .expect("Failed to create client");

    let err = client.list_floating_ips().await.expect_err("nothing listens on port 9");
    assert!(matches!(err, openstack_client::CloudError::Http(_)), "unexpected error: {err:?}");
}
