//! Optional background poll of the clients table.
//!
//! Keeps a warm eye on the store when enabled: fetches the first page at a
//! fixed interval and logs the outcome. Read-only, shares nothing with
//! request handlers beyond the store adapter.

use crate::models::RawClient;
use crate::store::{StoreClient, CLIENTS_TABLE};
use std::time::Duration;
use tracing::{info, warn};

const POLL_PAGE_SIZE: usize = 20;

/// Spawns the polling loop on the runtime. The task runs until the process
/// exits.
pub fn spawn(store: StoreClient, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        info!(interval_secs, "Client store polling enabled");
        loop {
            ticker.tick().await;
            match store
                .fetch_page::<RawClient>(
                    CLIENTS_TABLE,
                    "*",
                    &[],
                    "ultima_interaccion",
                    true,
                    0,
                    POLL_PAGE_SIZE,
                )
                .await
            {
                Ok(rows) => info!(rows = rows.len(), "Store poll succeeded"),
                Err(e) => warn!(error = %e, "Store poll failed"),
            }
        }
    });
}
