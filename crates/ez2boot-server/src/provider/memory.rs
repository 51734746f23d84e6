//! Simulated cloud for local runs and tests.
//!
//! Power operations put an instance into `transitioning`; the following scrape
//! settles it into the requested state. Individual ids can be marked as
//! failing to exercise partial-batch handling.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Provider, ProviderError, ScrapedInstance};
use crate::storage::ServerState;

#[derive(Debug, Clone)]
struct SimInstance {
    instance: ScrapedInstance,
    settles_to: Option<ServerState>,
}

#[derive(Debug, Default)]
struct SimCloud {
    instances: BTreeMap<String, SimInstance>,
    failing: BTreeSet<String>,
    scrape_unavailable: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryProvider {
    cloud: Mutex<SimCloud>,
}

impl InMemoryProvider {
    pub fn new(instances: impl IntoIterator<Item = ScrapedInstance>) -> Self {
        let instances = instances
            .into_iter()
            .map(|instance| {
                (
                    instance.unique_id.clone(),
                    SimInstance {
                        instance,
                        settles_to: None,
                    },
                )
            })
            .collect();
        Self {
            cloud: Mutex::new(SimCloud {
                instances,
                ..SimCloud::default()
            }),
        }
    }

    /// Load instances from a JSON array of
    /// `{unique_id, name, server_group, state}` objects.
    pub fn from_fixture(path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Unavailable(format!("Failed to read fixture {}: {e}", path.display()))
        })?;
        let instances: Vec<ScrapedInstance> = serde_json::from_str(&content).map_err(|e| {
            ProviderError::InvalidInstance(format!(
                "Failed to parse fixture {}: {e}",
                path.display()
            ))
        })?;
        info!(count = instances.len(), path = %path.display(), "Loaded simulated instances");
        Ok(Self::new(instances))
    }

    /// Make power operations on `unique_id` fail (or succeed again).
    pub async fn set_failing(&self, unique_id: &str, failing: bool) {
        let mut cloud = self.cloud.lock().await;
        if failing {
            cloud.failing.insert(unique_id.to_string());
        } else {
            cloud.failing.remove(unique_id);
        }
    }

    /// Make every scrape fail until cleared.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.cloud.lock().await.scrape_unavailable = unavailable;
    }

    /// Add or replace an instance.
    pub async fn upsert(&self, instance: ScrapedInstance) {
        self.cloud.lock().await.instances.insert(
            instance.unique_id.clone(),
            SimInstance {
                instance,
                settles_to: None,
            },
        );
    }

    pub async fn remove(&self, unique_id: &str) -> bool {
        self.cloud.lock().await.instances.remove(unique_id).is_some()
    }

    /// Current state of an instance without settling pending transitions.
    pub async fn state_of(&self, unique_id: &str) -> Option<ServerState> {
        self.cloud
            .lock()
            .await
            .instances
            .get(unique_id)
            .map(|sim| sim.instance.state)
    }

    async fn transition(
        &self,
        ids: &BTreeSet<String>,
        from: ServerState,
        to: ServerState,
    ) -> Result<(), ProviderError> {
        let mut cloud = self.cloud.lock().await;
        for id in ids {
            if cloud.failing.contains(id) {
                warn!(instance_id = %id, target = %to, "Simulated power operation failed");
                continue;
            }
            let Some(sim) = cloud.instances.get_mut(id) else {
                warn!(instance_id = %id, "Unknown simulated instance");
                continue;
            };
            if sim.instance.state != from {
                debug!(instance_id = %id, state = %sim.instance.state, "Instance not in expected state");
                continue;
            }
            sim.instance.state = ServerState::Transitioning;
            sim.settles_to = Some(to);
            info!(instance_id = %id, target = %to, "Simulated power operation initiated");
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn scrape(&self) -> Result<Vec<ScrapedInstance>, ProviderError> {
        let mut cloud = self.cloud.lock().await;
        if cloud.scrape_unavailable {
            return Err(ProviderError::Unavailable("simulated outage".to_string()));
        }
        for sim in cloud.instances.values_mut() {
            if let Some(target) = sim.settles_to.take() {
                sim.instance.state = target;
            }
        }
        Ok(cloud
            .instances
            .values()
            .map(|sim| sim.instance.clone())
            .collect())
    }

    async fn start(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
        self.transition(ids, ServerState::Off, ServerState::On).await
    }

    async fn stop(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
        self.transition(ids, ServerState::On, ServerState::Off).await
    }
}
