//! Cloud provider adapters.
//!
//! Each adapter scrapes the opted-in instances of one cloud and starts or
//! stops them by id, translating native power states into [`ServerState`].

pub mod aws;
pub mod azure;
pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::ServerState;

pub use aws::{AwsProvider, Ec2Api, Ec2Instance};
pub use azure::{AzureProvider, AzureVm, ComputeApi};
pub use memory::InMemoryProvider;

/// Errors from provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The cloud API rejected or failed a call.
    #[error("Provider API error: {0}")]
    Api(String),

    /// An instance record could not be interpreted.
    #[error("Invalid instance: {0}")]
    InvalidInstance(String),

    /// The provider could not be reached or configured.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// One opted-in instance as observed by a scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedInstance {
    pub unique_id: String,
    pub name: String,
    pub server_group: String,
    pub state: ServerState,
}

/// Scrape and power-control capability for one cloud.
///
/// `start` and `stop` log and skip per-instance failures; an `Err` means the
/// whole batch could not be attempted.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short adapter name used in logs.
    fn name(&self) -> &'static str;

    /// Full list of instances carrying the configured tag.
    async fn scrape(&self) -> Result<Vec<ScrapedInstance>, ProviderError>;

    async fn start(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError>;

    async fn stop(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError>;
}
