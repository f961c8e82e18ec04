// Shared test helpers

use std::sync::{Mutex, MutexGuard, OnceLock};

use conprof::models::ProfileTarget;

/// Serializes tests that swap the process-wide config snapshot; tests in
/// one binary run on parallel threads and would otherwise race on it.
pub fn config_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn profile_target(kind: &str) -> ProfileTarget {
    ProfileTarget {
        kind: kind.to_string(),
        component: "database".to_string(),
        address: "10.0.0.1:10080".to_string(),
    }
}

/// Serve `app` on an ephemeral local port; returns `ip:port`. The server
/// task lives until the test runtime shuts down.
pub async fn spawn_local_server(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}
