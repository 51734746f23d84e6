//! Azure Compute adapter.
//!
//! VMs are identified by their full resource id; the resource group and VM
//! name needed for power operations are parsed back out of it.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Provider, ProviderError, ScrapedInstance};
use crate::storage::ServerState;

const POWER_STATE_PREFIX: &str = "PowerState/";

/// A VM as returned by the subscription-wide list call.
#[derive(Debug, Clone, Default)]
pub struct AzureVm {
    /// `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Compute/virtualMachines/{name}`
    pub id: String,
    pub tags: BTreeMap<String, String>,
}

/// Minimal Compute surface the adapter needs.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_vms(&self) -> Result<Vec<AzureVm>, ProviderError>;

    /// Instance-view status codes, e.g. `ProvisioningState/succeeded`,
    /// `PowerState/running`.
    async fn instance_statuses(
        &self,
        resource_group: &str,
        vm_name: &str,
    ) -> Result<Vec<String>, ProviderError>;

    async fn begin_start(&self, resource_group: &str, vm_name: &str) -> Result<(), ProviderError>;

    async fn begin_deallocate(
        &self,
        resource_group: &str,
        vm_name: &str,
    ) -> Result<(), ProviderError>;
}

pub struct AzureProvider<C> {
    client: C,
    tag_key: String,
}

/// Split a VM resource id into `(resource_group, vm_name)`.
pub fn parse_vm_id(id: &str) -> Result<(&str, &str), ProviderError> {
    let parts: Vec<&str> = id.split('/').collect();
    if parts.len() < 9 {
        return Err(ProviderError::InvalidInstance(format!("invalid VM id: {id}")));
    }
    Ok((parts[4], parts[8]))
}

/// Extract the power state from instance-view status codes.
pub fn power_state(statuses: &[String]) -> &str {
    statuses
        .iter()
        .find_map(|code| code.strip_prefix(POWER_STATE_PREFIX))
        .unwrap_or("unknown")
}

/// Map an Azure power state onto the generic vocabulary.
pub fn map_state(state: &str) -> ServerState {
    match state {
        "running" => ServerState::On,
        "starting" | "stopping" | "deallocating" => ServerState::Transitioning,
        _ => ServerState::Off,
    }
}

impl<C: ComputeApi> AzureProvider<C> {
    pub fn new(client: C, tag_key: impl Into<String>) -> Self {
        Self {
            client,
            tag_key: tag_key.into(),
        }
    }

    async fn scrape_vm(&self, vm: &AzureVm) -> Result<Option<ScrapedInstance>, ProviderError> {
        let Some(server_group) = vm.tags.get(&self.tag_key) else {
            return Ok(None);
        };
        let (resource_group, vm_name) = parse_vm_id(&vm.id)?;
        let statuses = self
            .client
            .instance_statuses(resource_group, vm_name)
            .await?;

        Ok(Some(ScrapedInstance {
            unique_id: vm.id.clone(),
            name: vm_name.to_string(),
            server_group: server_group.clone(),
            state: map_state(power_state(&statuses)),
        }))
    }
}

#[async_trait]
impl<C: ComputeApi> Provider for AzureProvider<C> {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn scrape(&self) -> Result<Vec<ScrapedInstance>, ProviderError> {
        let vms = self.client.list_vms().await?;
        let mut scraped = Vec::new();

        for vm in &vms {
            match self.scrape_vm(vm).await {
                Ok(Some(instance)) => scraped.push(instance),
                Ok(None) => {}
                Err(e) => warn!(id = %vm.id, error = %e, "Skipping Azure VM"),
            }
        }

        debug!(count = scraped.len(), "Scraped Azure VMs");
        Ok(scraped)
    }

    async fn start(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
        for id in ids {
            let result = match parse_vm_id(id) {
                Ok((rg, name)) => self.client.begin_start(rg, name).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => info!(id = %id, "Azure VM start initiated"),
                Err(e) => warn!(id = %id, error = %e, "Failed to start Azure VM"),
            }
        }
        Ok(())
    }

    async fn stop(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
        for id in ids {
            let result = match parse_vm_id(id) {
                Ok((rg, name)) => self.client.begin_deallocate(rg, name).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => info!(id = %id, "Azure VM deallocation initiated"),
                Err(e) => warn!(id = %id, error = %e, "Failed to deallocate Azure VM"),
            }
        }
        Ok(())
    }
}
