//! EC2 adapter.
//!
//! The SDK binding lives behind [`Ec2Api`]; this module owns tag filtering,
//! state mapping and per-instance error handling.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Provider, ProviderError, ScrapedInstance};
use crate::storage::ServerState;

/// An EC2 instance as returned by `DescribeInstances`.
#[derive(Debug, Clone, Default)]
pub struct Ec2Instance {
    pub instance_id: String,
    /// Native state name, e.g. `running` or `stopped`.
    pub state: String,
    pub tags: BTreeMap<String, String>,
}

/// Minimal EC2 surface the adapter needs.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// Instances that carry `tag_key`, in any state.
    async fn describe_instances(&self, tag_key: &str) -> Result<Vec<Ec2Instance>, ProviderError>;

    async fn start_instance(&self, instance_id: &str) -> Result<(), ProviderError>;

    async fn stop_instance(&self, instance_id: &str) -> Result<(), ProviderError>;
}

pub struct AwsProvider<C> {
    client: C,
    tag_key: String,
}

impl<C: Ec2Api> AwsProvider<C> {
    pub fn new(client: C, tag_key: impl Into<String>) -> Self {
        Self {
            client,
            tag_key: tag_key.into(),
        }
    }

    fn to_scraped(&self, instance: Ec2Instance) -> Option<ScrapedInstance> {
        let server_group = instance.tags.get(&self.tag_key)?.clone();
        let name = instance
            .tags
            .get("Name")
            .cloned()
            .unwrap_or_else(|| instance.instance_id.clone());
        Some(ScrapedInstance {
            state: map_state(&instance.state),
            unique_id: instance.instance_id,
            name,
            server_group,
        })
    }
}

/// Map an EC2 state name onto the generic vocabulary.
pub fn map_state(state: &str) -> ServerState {
    match state {
        "running" => ServerState::On,
        "pending" | "stopping" => ServerState::Transitioning,
        _ => ServerState::Off,
    }
}

#[async_trait]
impl<C: Ec2Api> Provider for AwsProvider<C> {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn scrape(&self) -> Result<Vec<ScrapedInstance>, ProviderError> {
        let instances = self.client.describe_instances(&self.tag_key).await?;
        let scraped: Vec<_> = instances
            .into_iter()
            .filter_map(|i| self.to_scraped(i))
            .collect();
        debug!(count = scraped.len(), "Scraped EC2 instances");
        Ok(scraped)
    }

    async fn start(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
        for id in ids {
            match self.client.start_instance(id).await {
                Ok(()) => info!(instance_id = %id, "EC2 start initiated"),
                Err(e) => warn!(instance_id = %id, error = %e, "Failed to start EC2 instance"),
            }
        }
        Ok(())
    }

    async fn stop(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
        for id in ids {
            match self.client.stop_instance(id).await {
                Ok(()) => info!(instance_id = %id, "EC2 stop initiated"),
                Err(e) => warn!(instance_id = %id, error = %e, "Failed to stop EC2 instance"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FakeEc2 {
        instances: Vec<Ec2Instance>,
        failing: BTreeSet<String>,
        started: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Ec2Api for FakeEc2 {
        async fn describe_instances(
            &self,
            _tag_key: &str,
        ) -> Result<Vec<Ec2Instance>, ProviderError> {
            Ok(self.instances.clone())
        }

        async fn start_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
            if self.failing.contains(instance_id) {
                return Err(ProviderError::Api("IncorrectInstanceState".into()));
            }
            self.started.lock().unwrap().push(instance_id.to_string());
            Ok(())
        }

        async fn stop_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
            self.stopped.lock().unwrap().push(instance_id.to_string());
            Ok(())
        }
    }

    fn ec2(id: &str, state: &str, tags: &[(&str, &str)]) -> Ec2Instance {
        Ec2Instance {
            instance_id: id.to_string(),
            state: state.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn maps_native_states() {
        assert_eq!(map_state("running"), ServerState::On);
        assert_eq!(map_state("pending"), ServerState::Transitioning);
        assert_eq!(map_state("stopping"), ServerState::Transitioning);
        assert_eq!(map_state("stopped"), ServerState::Off);
        assert_eq!(map_state("terminated"), ServerState::Off);
        assert_eq!(map_state("shutting-down"), ServerState::Off);
    }

    #[tokio::test]
    async fn scrape_reads_group_and_name_tags() {
        let client = FakeEc2 {
            instances: vec![
                ec2("i-1", "running", &[("ez2boot", "qa"), ("Name", "web")]),
                ec2("i-2", "stopped", &[("ez2boot", "qa")]),
                ec2("i-3", "running", &[("Name", "untagged")]),
            ],
            ..FakeEc2::default()
        };
        let provider = AwsProvider::new(client, "ez2boot");

        let scraped = provider.scrape().await.unwrap();
        assert_eq!(scraped.len(), 2);
        assert_eq!(scraped[0].name, "web");
        assert_eq!(scraped[0].server_group, "qa");
        assert_eq!(scraped[0].state, ServerState::On);
        assert_eq!(scraped[1].name, "i-2");
        assert_eq!(scraped[1].state, ServerState::Off);
    }

    #[tokio::test]
    async fn start_skips_failing_instances() {
        let client = FakeEc2 {
            failing: BTreeSet::from(["i-2".to_string()]),
            ..FakeEc2::default()
        };
        let provider = AwsProvider::new(client, "ez2boot");
        let ids = BTreeSet::from(["i-1".to_string(), "i-2".to_string(), "i-3".to_string()]);

        provider.start(&ids).await.unwrap();
        assert_eq!(*provider.client.started.lock().unwrap(), vec!["i-1", "i-3"]);
    }

    #[tokio::test]
    async fn stop_calls_every_instance() {
        let provider = AwsProvider::new(FakeEc2::default(), "ez2boot");
        let ids = BTreeSet::from(["i-1".to_string(), "i-2".to_string()]);

        provider.stop(&ids).await.unwrap();
        assert_eq!(provider.client.stopped.lock().unwrap().len(), 2);
    }
}
