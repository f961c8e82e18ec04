// Scraper and discovery tests against local HTTP endpoints.

mod common;

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Query;
use axum::http::HeaderMap;
use axum::routing::get;
use common::spawn_local_server;
use conprof::cluster_repo::TopologySource;
use conprof::discovery::TopologyDiscoverer;
use conprof::models::{MemberInfo, MemberStatus};
use conprof::scrape::{PprofConfig, Scraper, Target};
use flate2::Compression;
use flate2::write::GzEncoder;

fn gzip(payload: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

fn scraper_for(address: &str, kind: &str, cfg: &PprofConfig) -> Scraper {
    let target = Target::new("database", address, kind, "http", cfg).unwrap();
    Scraper::new(target, reqwest::Client::new()).unwrap()
}

#[tokio::test]
async fn scraper_reads_plain_body() {
    let app = Router::new().route(
        "/debug/pprof/allocs",
        get(|| async { b"alloc-profile".to_vec() }),
    );
    let address = spawn_local_server(app).await;

    let cfg = PprofConfig {
        path: "/debug/pprof/allocs".to_string(),
        ..Default::default()
    };
    let scraper = scraper_for(&address, "allocs", &cfg);
    let mut buf = Vec::new();
    scraper
        .scrape(Duration::from_secs(5), &mut buf)
        .await
        .unwrap();
    assert_eq!(buf, b"alloc-profile");
}

#[tokio::test]
async fn scraper_transparently_decodes_gzip_bodies() {
    let payload: Vec<u8> = (0..42u8).collect();
    let gzipped = gzip(&payload);
    let app = Router::new().route(
        "/debug/pprof/profile",
        get(move || async move { gzipped.clone() }),
    );
    let address = spawn_local_server(app).await;

    let cfg = PprofConfig {
        path: "/debug/pprof/profile".to_string(),
        ..Default::default()
    };
    let scraper = scraper_for(&address, "profile", &cfg);
    let mut buf = Vec::new();
    scraper
        .scrape(Duration::from_secs(5), &mut buf)
        .await
        .unwrap();
    assert_eq!(buf.len(), 42);
    assert_eq!(buf, payload);
}

#[tokio::test]
async fn scraper_sends_configured_query_and_headers() {
    let app = Router::new().route(
        "/debug/pprof/profile",
        get(
            |Query(params): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                format!(
                    "seconds={} debug={} content-type={}",
                    params.get("seconds").cloned().unwrap_or_default(),
                    params.get("debug").cloned().unwrap_or_default(),
                    headers
                        .get("Content-Type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default(),
                )
            },
        ),
    );
    let address = spawn_local_server(app).await;

    let cfg = PprofConfig {
        path: "/debug/pprof/profile".to_string(),
        seconds: 3,
        params: HashMap::from([("debug".to_string(), "2".to_string())]),
        header: HashMap::from([(
            "Content-Type".to_string(),
            "application/protobuf".to_string(),
        )]),
    };
    let scraper = scraper_for(&address, "profile", &cfg);
    let mut buf = Vec::new();
    scraper
        .scrape(Duration::from_secs(5), &mut buf)
        .await
        .unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "seconds=3 debug=2 content-type=application/protobuf"
    );
}

#[tokio::test]
async fn scraper_fails_on_non_200_status() {
    let app = Router::new().route(
        "/debug/pprof/mutex",
        get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let address = spawn_local_server(app).await;

    let cfg = PprofConfig {
        path: "/debug/pprof/mutex".to_string(),
        ..Default::default()
    };
    let scraper = scraper_for(&address, "mutex", &cfg);
    let mut buf = Vec::new();
    let err = scraper
        .scrape(Duration::from_secs(5), &mut buf)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("server returned HTTP status"));
}

#[tokio::test]
async fn scraper_enforces_the_per_call_deadline() {
    let app = Router::new().route(
        "/debug/pprof/profile",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "too late"
        }),
    );
    let address = spawn_local_server(app).await;

    let cfg = PprofConfig {
        path: "/debug/pprof/profile".to_string(),
        ..Default::default()
    };
    let scraper = scraper_for(&address, "profile", &cfg);
    let mut buf = Vec::new();
    let started = std::time::Instant::now();
    let result = scraper.scrape(Duration::from_millis(300), &mut buf).await;
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}

struct FakeSource;

#[async_trait]
impl TopologySource for FakeSource {
    async fn fetch_node_topology(&self) -> anyhow::Result<Vec<MemberInfo>> {
        Ok(vec![
            MemberInfo {
                ip: "10.0.0.1".to_string(),
                port: 4000,
                status_port: 10080,
                status: MemberStatus::Up,
            },
            MemberInfo {
                ip: "10.0.0.2".to_string(),
                port: 4000,
                status_port: 10080,
                status: MemberStatus::Down,
            },
        ])
    }

    async fn fetch_metadata_topology(&self) -> anyhow::Result<Vec<MemberInfo>> {
        Ok(vec![MemberInfo {
            ip: "10.0.0.3".to_string(),
            port: 2379,
            status_port: 2379,
            status: MemberStatus::Up,
        }])
    }

    async fn fetch_storage_topology(&self) -> anyhow::Result<(Vec<MemberInfo>, Vec<MemberInfo>)> {
        Ok((
            vec![MemberInfo {
                ip: "10.0.0.4".to_string(),
                port: 20160,
                status_port: 20180,
                status: MemberStatus::Up,
            }],
            vec![MemberInfo {
                ip: "10.0.0.5".to_string(),
                port: 3930,
                status_port: 20292,
                status: MemberStatus::Tombstone,
            }],
        ))
    }
}

#[tokio::test]
async fn discoverer_publishes_only_up_members() {
    let discoverer = Arc::new(TopologyDiscoverer::new(Box::new(FakeSource)));
    let mut rx = discoverer.subscribe();
    let handle = discoverer.clone().start();

    let members = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("first topology snapshot")
        .expect("channel open");

    let summary: Vec<(String, String)> = members
        .iter()
        .map(|m| (m.name.clone(), m.scrape_address()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("database".to_string(), "10.0.0.1:10080".to_string()),
            ("metadata".to_string(), "10.0.0.3:2379".to_string()),
            ("storage".to_string(), "10.0.0.4:20180".to_string()),
        ]
    );

    discoverer.close();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}
