// src/roster_refresh.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::roster::RosterCache;

pub async fn run_roster_refresh(roster: Arc<RosterCache>, interval: Duration) {
    info!(
        "Starting background roster refresh task (every {} seconds)",
        interval.as_secs()
    );
    loop {
        sleep(interval).await;
        match roster.refresh().await {
            Ok(index) => info!("Roster refreshed: {} students", index.len()),
            // The previous roster stays in use until a refresh succeeds.
            Err(e) => error!("Scheduled roster refresh failed: {}", e),
        }
    }
}
