// Scrape manager: reconciles (topology snapshot × config snapshot) into
// the set of running scrape suites.

mod suite;
mod target;

pub use suite::SuiteHandle;
pub use target::{PprofConfig, Scraper, Target};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::{self, ContinuousProfilingConfig};
use crate::models::{COMPONENT_DATABASE, COMPONENT_METADATA, Member, ProfileTarget};
use crate::profile_repo::ProfileStorage;

const UPDATE_TARGET_META_INTERVAL: Duration = Duration::from_secs(60);

pub struct ScrapeManager {
    store: Arc<ProfileStorage>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    reload_tx: mpsc::Sender<()>,
    reload_rx: Mutex<Option<mpsc::Receiver<()>>>,
    cur_components: Mutex<HashSet<Member>>,
    suites: Mutex<HashMap<ProfileTarget, SuiteHandle>>,
}

impl ScrapeManager {
    pub fn new(store: Arc<ProfileStorage>) -> Self {
        let (reload_tx, reload_rx) = mpsc::channel(1);
        Self {
            store,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            reload_tx,
            reload_rx: Mutex::new(Some(reload_rx)),
            cur_components: Mutex::new(HashSet::new()),
            suites: Mutex::new(HashMap::new()),
        }
    }

    /// Launch the event loop on `topology_rx` plus the periodic target-meta
    /// writer.
    pub fn start(self: Arc<Self>, topology_rx: mpsc::Receiver<Vec<Member>>) {
        let manager = self.clone();
        self.tracker
            .spawn(async move { manager.run(topology_rx).await });
        let manager = self.clone();
        self.tracker
            .spawn(async move { manager.update_target_meta_loop().await });
    }

    /// Ask the event loop to re-evaluate the config. Coalesces: a pending
    /// request satisfies any number of callers.
    pub fn notify_reload(&self) {
        let _ = self.reload_tx.try_send(());
    }

    /// Members currently being scraped, sorted for stable API output.
    pub fn components(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .cur_components
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        members.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.ip.cmp(&b.ip))
                .then_with(|| a.port.cmp(&b.port))
        });
        members
    }

    /// Targets with a live suite.
    pub fn suite_targets(&self) -> Vec<ProfileTarget> {
        self.suites.lock().unwrap().keys().cloned().collect()
    }

    /// Sum of the most recent body sizes across all live suites, the input
    /// to the on-disk footprint estimate.
    pub fn total_last_scrape_size(&self) -> u64 {
        self.suites
            .lock()
            .unwrap()
            .values()
            .map(|handle| handle.last_scrape_size() as u64)
            .sum()
    }

    async fn run(&self, mut topology_rx: mpsc::Receiver<Vec<Member>>) {
        let Some(mut reload_rx) = self.reload_rx.lock().unwrap().take() else {
            error!("scrape manager started twice");
            return;
        };
        let mut last_components: HashSet<Member> = HashSet::new();
        let mut old_cfg = config::global_config().continuous_profiling;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                snapshot = topology_rx.recv() => {
                    match snapshot {
                        Some(members) => last_components = members.into_iter().collect(),
                        None => return,
                    }
                }
                _ = reload_rx.recv() => {}
            }

            let new_cfg = config::global_config().continuous_profiling;
            self.reload(&last_components, old_cfg, new_cfg);
            old_cfg = new_cfg;
        }
    }

    fn reload(
        &self,
        last_components: &HashSet<Member>,
        old_cfg: ContinuousProfilingConfig,
        new_cfg: ContinuousProfilingConfig,
    ) {
        let config_changed = old_cfg != new_cfg;

        let current: Vec<Member> = self
            .cur_components
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        for member in &current {
            if last_components.contains(member) && !config_changed {
                continue;
            }
            self.stop_scrape(member);
        }

        if !new_cfg.enable {
            return;
        }

        let current: HashSet<Member> = self.cur_components.lock().unwrap().clone();
        for member in last_components {
            if current.contains(member) && !config_changed {
                continue;
            }
            if let Err(e) = self.start_scrape(member, new_cfg) {
                error!(
                    component = %member.name,
                    address = %member.scrape_address(),
                    error = %e,
                    "start scrape failed"
                );
            }
        }
    }

    fn start_scrape(
        &self,
        member: &Member,
        cfg: ContinuousProfilingConfig,
    ) -> anyhow::Result<()> {
        if !cfg.enable {
            return Ok(());
        }
        let app_cfg = config::global_config();
        let scheme = app_cfg.scheme();
        let address = member.scrape_address();

        // Build every scraper first: a failing kind must leave the member
        // with zero suites and no membership, to be retried on the next
        // reload.
        let template = profiling_template(&member.name, cfg);
        let mut scrapers = Vec::with_capacity(template.len());
        for (kind, pprof_cfg) in &template {
            let client = app_cfg
                .security
                .http_client_builder()?
                .build()
                .context("build scrape client")?;
            let scrape_target = Target::new(&member.name, &address, kind, scheme, pprof_cfg)?;
            scrapers.push(Scraper::new(scrape_target, client)?);
        }

        let interval = Duration::from_secs(cfg.interval_seconds as u64);
        let timeout = Duration::from_secs(cfg.timeout_seconds as u64);
        {
            let mut suites = self.suites.lock().unwrap();
            for scraper in scrapers {
                let key = scraper.target().clone();
                let handle = SuiteHandle::new(self.cancel.child_token());
                self.tracker.spawn(suite::run(
                    scraper,
                    self.store.clone(),
                    interval,
                    timeout,
                    handle.clone(),
                ));
                suites.insert(key, handle);
            }
        }
        self.cur_components.lock().unwrap().insert(member.clone());
        info!(component = %member.name, address = %address, "start component scrape");
        Ok(())
    }

    fn stop_scrape(&self, member: &Member) {
        self.cur_components.lock().unwrap().remove(member);
        let address = member.scrape_address();
        info!(component = %member.name, address = %address, "stop component scrape");

        let cfg = config::global_config().continuous_profiling;
        let mut suites = self.suites.lock().unwrap();
        for (kind, _) in profiling_template(&member.name, cfg) {
            let key = ProfileTarget {
                kind: kind.to_string(),
                component: member.name.clone(),
                address: address.clone(),
            };
            if let Some(handle) = suites.remove(&key) {
                handle.stop();
            }
        }
    }

    async fn update_target_meta_loop(&self) {
        let mut tick = tokio::time::interval(UPDATE_TARGET_META_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tick.tick() => {}
            }

            let snapshot: Vec<(ProfileTarget, i64)> = self
                .suites
                .lock()
                .unwrap()
                .iter()
                .map(|(key, handle)| (key.clone(), handle.last_scrape_millis()))
                .collect();
            let total = snapshot.len();
            let mut updated = 0usize;
            for (key, ts) in snapshot {
                if ts <= 0 {
                    continue;
                }
                match self.store.update_profile_target_info(&key, ts).await {
                    Ok(true) => updated += 1,
                    Ok(false) => {}
                    Err(e) => warn!(
                        kind = %key.kind,
                        component = %key.component,
                        address = %key.address,
                        error = %e,
                        "update target meta failed"
                    ),
                }
            }
            info!(updated, total, "updated scrape target meta");
        }
    }

    /// Stop everything: cancel the root token, wait for every suite and
    /// loop to exit, then close the store. No suite outlives the store.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.store.close().await;
    }
}

/// Profile kinds scraped per component role. Managed-runtime components
/// expose the full pprof family; native components only support the CPU
/// profile endpoint and answer with protobuf.
fn profiling_template(
    component: &str,
    cfg: ContinuousProfilingConfig,
) -> Vec<(&'static str, PprofConfig)> {
    match component {
        COMPONENT_DATABASE | COMPONENT_METADATA => vec![
            (
                "allocs",
                PprofConfig {
                    path: "/debug/pprof/allocs".to_string(),
                    ..Default::default()
                },
            ),
            (
                "goroutine",
                PprofConfig {
                    path: "/debug/pprof/goroutine".to_string(),
                    params: HashMap::from([("debug".to_string(), "2".to_string())]),
                    ..Default::default()
                },
            ),
            (
                "mutex",
                PprofConfig {
                    path: "/debug/pprof/mutex".to_string(),
                    ..Default::default()
                },
            ),
            (
                "profile",
                PprofConfig {
                    path: "/debug/pprof/profile".to_string(),
                    seconds: cfg.profile_seconds,
                    ..Default::default()
                },
            ),
        ],
        _ => vec![(
            "profile",
            PprofConfig {
                path: "/debug/pprof/profile".to_string(),
                seconds: cfg.profile_seconds,
                header: HashMap::from([(
                    "Content-Type".to_string(),
                    "application/protobuf".to_string(),
                )]),
                ..Default::default()
            },
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_runtime_components_get_full_pprof_family() {
        let cfg = ContinuousProfilingConfig {
            profile_seconds: 9,
            ..Default::default()
        };
        for component in [COMPONENT_DATABASE, COMPONENT_METADATA] {
            let kinds: Vec<&str> = profiling_template(component, cfg)
                .iter()
                .map(|(kind, _)| *kind)
                .collect();
            assert_eq!(kinds, ["allocs", "goroutine", "mutex", "profile"]);
        }
        let template = profiling_template(COMPONENT_DATABASE, cfg);
        let (_, profile) = template.last().unwrap();
        assert_eq!(profile.seconds, 9);
    }

    #[test]
    fn native_components_only_get_cpu_profile() {
        let cfg = ContinuousProfilingConfig::default();
        let template = profiling_template("storage", cfg);
        assert_eq!(template.len(), 1);
        let (kind, profile) = &template[0];
        assert_eq!(*kind, "profile");
        assert_eq!(
            profile.header.get("Content-Type").map(String::as_str),
            Some("application/protobuf")
        );
    }
}
