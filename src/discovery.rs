// Topology discovery: polls the cluster's metadata service and fans live
// member lists out to subscribers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::cluster_repo::TopologySource;
use crate::models::{
    COMPONENT_DATABASE, COMPONENT_METADATA, COMPONENT_REPLICA, COMPONENT_STORAGE, Member,
    MemberInfo, MemberStatus,
};

pub const DISCOVER_INTERVAL: Duration = Duration::from_secs(30);

pub struct TopologyDiscoverer {
    source: Box<dyn TopologySource>,
    subscribers: Mutex<Vec<mpsc::Sender<Vec<Member>>>>,
    cancel: CancellationToken,
}

impl TopologyDiscoverer {
    pub fn new(source: Box<dyn TopologySource>) -> Self {
        Self {
            source,
            subscribers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a subscription channel. Delivery is best-effort: a
    /// subscriber that has not drained the previous snapshot misses the
    /// update and catches up on the next one.
    pub fn subscribe(&self) -> mpsc::Receiver<Vec<Member>> {
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Poll immediately, then on a fixed cadence until `close()`.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.load_topology().await;
            let mut tick = tokio::time::interval(DISCOVER_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tick.tick() => self.load_topology().await,
                }
            }
        })
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    async fn load_topology(&self) {
        let members =
            match tokio::time::timeout(DISCOVER_INTERVAL, self.fetch_all_members()).await {
                Ok(Ok(members)) => members,
                Ok(Err(e)) => {
                    error!(error = %e, "load topology failed");
                    return;
                }
                Err(_) => {
                    error!("load topology timed out");
                    return;
                }
            };
        self.notify_subscribers(members);
    }

    async fn fetch_all_members(&self) -> anyhow::Result<Vec<Member>> {
        let mut members = Vec::with_capacity(8);
        collect_up(
            &mut members,
            COMPONENT_DATABASE,
            self.source.fetch_node_topology().await?,
        );
        collect_up(
            &mut members,
            COMPONENT_METADATA,
            self.source.fetch_metadata_topology().await?,
        );
        let (primary, secondary) = self.source.fetch_storage_topology().await?;
        collect_up(&mut members, COMPONENT_STORAGE, primary);
        collect_up(&mut members, COMPONENT_REPLICA, secondary);
        Ok(members)
    }

    fn notify_subscribers(&self, members: Vec<Member>) {
        let subscribers = self.subscribers.lock().unwrap();
        for tx in subscribers.iter() {
            // Non-blocking: never let a slow consumer stall the poll loop.
            let _ = tx.try_send(members.clone());
        }
    }
}

fn collect_up(out: &mut Vec<Member>, name: &str, instances: Vec<MemberInfo>) {
    for instance in instances {
        if instance.status != MemberStatus::Up {
            continue;
        }
        out.push(Member {
            name: name.to_string(),
            ip: instance.ip,
            port: instance.port,
            status_port: instance.status_port,
        });
    }
}
