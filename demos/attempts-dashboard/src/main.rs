//! Attempts dashboard demo.
//!
//! Binds the attempts list against a running backend proxy, polls it every
//! minute, revalidates when "focus" is simulated, and logs each snapshot as
//! it arrives.
//!
//! Environment:
//! - `DASHBOARD_API` - backend base URL (default `http://localhost:8000`)
//! - `DASHBOARD_TOKEN` - optional bearer token for role-gated resources

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dash_data::ApiClient;
use dash_sync::{resource_key, BindingOptions, CacheStore, Coordinator, Snapshot};

/// One practice attempt, as served by `GET /attempts`.
#[derive(Debug, Clone, Deserialize)]
struct Attempt {
    id: String,
    role: String,
    score: u32,
    duration_min: u32,
    #[serde(default)]
    difficulty: Option<String>,
}

fn render(snapshot: &Snapshot<Vec<Attempt>>) {
    if let Some(error) = &snapshot.error {
        warn!(%error, "attempts fetch failed, keeping last-known-good view");
    }
    match &snapshot.data {
        Some(attempts) => {
            let average = if attempts.is_empty() {
                0.0
            } else {
                attempts.iter().map(|a| a.score as f64).sum::<f64>() / attempts.len() as f64
            };
            info!(count = attempts.len(), average, "attempts updated");
            for attempt in attempts.iter().take(5) {
                info!(
                    id = %attempt.id,
                    role = %attempt.role,
                    score = attempt.score,
                    duration_min = attempt.duration_min,
                    difficulty = attempt.difficulty.as_deref().unwrap_or("-"),
                    "attempt"
                );
            }
        }
        None if snapshot.loading => info!("loading attempts..."),
        None => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let base_url =
        std::env::var("DASHBOARD_API").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let client = ApiClient::new(base_url.as_str())?;
    if let Ok(token) = std::env::var("DASHBOARD_TOKEN") {
        client.set_bearer_token(Some(token));
    }

    let store = Arc::new(CacheStore::<Vec<Attempt>>::new());
    let coordinator = Coordinator::new(store);

    let fetcher = Arc::new(
        client
            .json_fetcher::<Vec<Attempt>>("/attempts")
            .with_query("limit", "50"),
    );
    let binding = coordinator.bind(
        resource_key!["attempts", "dashboard"],
        fetcher,
        BindingOptions::new()
            .with_poll_interval(Duration::from_secs(60))
            .with_revalidate_on_focus(),
        |snapshot| render(&snapshot),
    );
    info!(base_url = %base_url, key = %binding.key(), "bound attempts list");

    // Simulate the window regaining focus a little while in; within the
    // dedupe window of the initial fetch this is a no-op on the network.
    tokio::time::sleep(Duration::from_secs(5)).await;
    coordinator.focus_signal().window_focused();

    tokio::signal::ctrl_c().await?;
    info!("detaching");
    drop(binding);
    Ok(())
}
