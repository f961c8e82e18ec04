// Domain models shared across discovery, scraping, storage and the HTTP API.

use serde::{Deserialize, Serialize};

/// Component role names as reported by the cluster's metadata service.
pub const COMPONENT_DATABASE: &str = "database";
pub const COMPONENT_METADATA: &str = "metadata";
pub const COMPONENT_STORAGE: &str = "storage";
pub const COMPONENT_REPLICA: &str = "replica";

/// A live cluster node as published by the topology discoverer.
/// Equality is structural over all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub status_port: u16,
}

impl Member {
    /// Address of the member's debug HTTP endpoint.
    pub fn scrape_address(&self) -> String {
        format!("{}:{}", self.ip, self.status_port)
    }
}

/// Health of an instance as reported by the topology source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Up,
    Down,
    Offline,
    Tombstone,
    Unreachable,
}

/// Raw instance record returned by a `TopologySource`; only `Up` instances
/// become `Member`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    pub ip: String,
    pub port: u16,
    pub status_port: u16,
    pub status: MemberStatus,
}

/// Scrape identity: one profile kind of one component instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileTarget {
    pub kind: String,
    pub component: String,
    pub address: String,
}

/// Persistent record about a registered target. The id is allocated once
/// and namespaces the target's profile table for the lifetime of the store.
#[derive(Debug, Clone, Copy)]
pub struct TargetInfo {
    pub id: i64,
    pub last_scrape_ts: i64,
}

/// Time-range query over one or more targets; empty `targets` means every
/// target the store knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicQueryParam {
    #[serde(rename = "begin_time")]
    pub begin: i64,
    #[serde(rename = "end_time")]
    pub end: i64,
    #[serde(default)]
    pub targets: Vec<ProfileTarget>,
}

/// Timestamps of the stored profiles of one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileList {
    pub target: ProfileTarget,
    #[serde(rename = "timestamp_list")]
    pub ts_list: Vec<i64>,
}
