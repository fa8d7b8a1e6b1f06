//! speedtest.net strategy against a mocked server list and test server
//!
//! Verifies:
//! - The nearest responsive server is measured in both directions
//! - `speedtest.pl` only considers servers in Poland
//! - A failed upload leaves the download result intact
//! - Server list failures are recorded as errors

use std::time::Duration;

use linkwatch::settings::SpeedTestMode;
use linkwatch::speedtest::{MeasureRequest, OoklaStrategy, ThroughputProbe};
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(mode: SpeedTestMode) -> MeasureRequest {
    MeasureRequest {
        mode,
        url: None,
        upload_url: None,
        duration: Duration::from_millis(300),
    }
}

async fn mount_servers(server: &MockServer) {
    let list = json!([
        {
            "url": format!("{}/de/upload.php", server.uri()),
            "name": "Berlin", "country": "Germany", "cc": "DE",
            "sponsor": "Example DE", "distance": 5
        },
        {
            "url": format!("{}/pl/upload.php", server.uri()),
            "name": "Warsaw", "country": "Poland", "cc": "PL",
            "sponsor": "Example PL", "distance": 50
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/(de|pl)/latency\.txt$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("test=test"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/(de|pl)/random\d+x\d+\.jpg$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64 * 1024]))
        .mount(server)
        .await;
}

fn strategy(server: &MockServer) -> OoklaStrategy {
    OoklaStrategy::new(format!("{}/servers", server.uri()), 5.0).unwrap()
}

#[tokio::test]
async fn test_polish_mode_measures_polish_server() {
    let server = MockServer::start().await;
    mount_servers(&server).await;
    Mock::given(method("POST"))
        .and(path("/pl/upload.php"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let measurement = strategy(&server).measure(&request(SpeedTestMode::SpeedtestPl)).await;

    assert_eq!(measurement.error, None);
    assert_eq!(measurement.server_country.as_deref(), Some("Poland"));
    assert_eq!(measurement.server_name.as_deref(), Some("Example PL"));
    assert!(measurement.bytes_downloaded > 0);
    assert!(measurement.mbps > 0.0);
    assert!(measurement.ping_ms.is_some());
    assert!(measurement.upload_mbps.is_some_and(|rate| rate > 0.0));
}

#[tokio::test]
async fn test_failed_upload_keeps_download() {
    let server = MockServer::start().await;
    mount_servers(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let measurement = strategy(&server).measure(&request(SpeedTestMode::SpeedtestNet)).await;

    assert_eq!(measurement.error, None);
    assert!(measurement.bytes_downloaded > 0);
    assert_eq!(measurement.upload_mbps, None);
}

#[tokio::test]
async fn test_no_polish_servers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "url": format!("{}/de/upload.php", server.uri()), "cc": "DE", "country": "Germany" }
        ])))
        .mount(&server)
        .await;

    let measurement = strategy(&server).measure(&request(SpeedTestMode::SpeedtestPl)).await;

    assert_eq!(measurement.error.as_deref(), Some("no speedtest.pl servers available"));
    assert_eq!(measurement.bytes_downloaded, 0);
    assert_eq!(measurement.mbps, 0.0);
}

#[tokio::test]
async fn test_server_list_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let measurement = strategy(&server).measure(&request(SpeedTestMode::SpeedtestNet)).await;

    assert!(measurement.error.is_some());
    assert_eq!(measurement.server_name, None);
}
