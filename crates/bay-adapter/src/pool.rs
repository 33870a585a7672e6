use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::BrowserAdapter;
use crate::ship::ShipAdapter;

/// Process-wide cache of adapter instances keyed by `(container_id,
/// endpoint)`, amortizing the meta probe and reusing connections.
///
/// One long-lived `reqwest::Client` per runtime kind; adapters share it.
/// Entries are inserted idempotently and invalidated when their session
/// leaves running.
pub struct AdapterPool {
    ship_client: reqwest::Client,
    browser_client: reqwest::Client,
    ships: Mutex<HashMap<(String, String), Arc<ShipAdapter>>>,
    browsers: Mutex<HashMap<(String, String), Arc<BrowserAdapter>>>,
}

impl Default for AdapterPool {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterPool {
    pub fn new() -> Self {
        let build = |kind: &str| {
            reqwest::Client::builder()
                .pool_idle_timeout(Duration::from_secs(90))
                .connect_timeout(Duration::from_secs(5))
                .user_agent(format!("bay-{kind}-adapter"))
                .build()
                .unwrap_or_default()
        };
        Self {
            ship_client: build("ship"),
            browser_client: build("browser"),
            ships: Mutex::new(HashMap::new()),
            browsers: Mutex::new(HashMap::new()),
        }
    }

    pub fn ship(&self, container_id: &str, endpoint: &str) -> Arc<ShipAdapter> {
        let key = (container_id.to_string(), endpoint.to_string());
        let mut guard = self.ships.lock().unwrap();
        guard
            .entry(key)
            .or_insert_with(|| Arc::new(ShipAdapter::new(endpoint, self.ship_client.clone())))
            .clone()
    }

    pub fn browser(&self, container_id: &str, endpoint: &str) -> Arc<BrowserAdapter> {
        let key = (container_id.to_string(), endpoint.to_string());
        let mut guard = self.browsers.lock().unwrap();
        guard
            .entry(key)
            .or_insert_with(|| {
                Arc::new(BrowserAdapter::new(endpoint, self.browser_client.clone()))
            })
            .clone()
    }

    /// Drop every cached adapter for a container (its meta cache with it).
    /// Called when the container's session transitions out of running.
    pub fn invalidate_container(&self, container_id: &str) {
        self.ships.lock().unwrap().retain(|(id, _), _| id != container_id);
        self.browsers.lock().unwrap().retain(|(id, _), _| id != container_id);
    }

    #[cfg(test)]
    pub(crate) fn ship_count(&self) -> usize {
        self.ships.lock().unwrap().len()
    }
}
