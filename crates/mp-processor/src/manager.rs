//! ProcessorManager - starts and stops the services of processor groups
//!
//! Each group is served by `concurrency` independent services, each with
//! its own session and consumer, all drawing from the group's runtime pool.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use mp_config::LifecycleConfig;
use tracing::{error, info, warn};

use crate::group::MessageProcessorGroup;
use crate::lifecycle::StartContext;
use crate::processor_metrics;
use crate::service::MessageProcessorService;
use crate::{ProcessorError, Result};

/// Consuming state of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStatus {
    pub name: String,
    pub destination: String,
    pub services: usize,
    pub consuming: usize,
}

struct GroupServices {
    group: Arc<MessageProcessorGroup>,
    services: Vec<Arc<MessageProcessorService>>,
}

pub struct ProcessorManager {
    config: LifecycleConfig,
    groups: DashMap<String, GroupServices>,
}

impl ProcessorManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            groups: DashMap::new(),
        }
    }

    /// Register a group and create its services (not started).
    pub fn add_group(&self, group: Arc<MessageProcessorGroup>) -> Result<()> {
        let name = group.name().to_string();
        if self.groups.contains_key(&name) {
            return Err(ProcessorError::Config(format!("duplicate processor group: {}", name)));
        }

        let services = (0..group.concurrency())
            .map(|instance| MessageProcessorService::with_instance(Arc::clone(&group), instance))
            .collect::<Vec<_>>();

        info!(group = %name, services = services.len(), "Registered processor group");
        self.groups.insert(name, GroupServices { group, services });
        Ok(())
    }

    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn services(&self, name: &str) -> Vec<Arc<MessageProcessorService>> {
        self.groups
            .get(name)
            .map(|entry| entry.services.clone())
            .unwrap_or_default()
    }

    /// Start every service of `name` and wait for their completion signals.
    ///
    /// On failure the services that did start are stopped again when
    /// `stop_on_partial_start` is set; the first error is returned.
    pub async fn start_group(&self, name: &str) -> Result<()> {
        let services = self.services(name);
        if services.is_empty() {
            return Err(ProcessorError::Config(format!("unknown processor group: {}", name)));
        }

        let timeout = self.config.start_timeout();
        let completions = services.iter().map(|service| {
            let (context, completion) = StartContext::new(service.service_name());
            service.start(context);
            completion.wait_timeout(timeout)
        });
        let results = join_all(completions).await;

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            error!(group = %name, error = %e, "Processor group failed to start");
            if self.config.stop_on_partial_start {
                self.stop_services(name, &services).await;
            }
            self.update_gauge(name, &services);
            return Err(e);
        }

        self.update_gauge(name, &services);
        info!(group = %name, services = services.len(), "Processor group started");
        Ok(())
    }

    /// Start all groups in name order.
    pub async fn start_all(&self) -> Result<()> {
        let names = self.group_names();
        for (index, name) in names.iter().enumerate() {
            if let Err(e) = self.start_group(name).await {
                if self.config.stop_on_partial_start {
                    warn!(group = %name, "Stopping previously started groups");
                    for started in &names[..index] {
                        self.stop_group(started).await;
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Returns false for an unknown group.
    pub async fn stop_group(&self, name: &str) -> bool {
        let services = self.services(name);
        if services.is_empty() {
            return false;
        }
        self.stop_services(name, &services).await;
        self.update_gauge(name, &services);
        true
    }

    pub async fn stop_all(&self) {
        for name in self.group_names() {
            self.stop_group(&name).await;
        }
        info!("All processor groups stopped");
    }

    pub fn status(&self) -> Vec<GroupStatus> {
        let mut status: Vec<GroupStatus> = self
            .groups
            .iter()
            .map(|entry| GroupStatus {
                name: entry.key().clone(),
                destination: entry.group.destination().to_string(),
                services: entry.services.len(),
                consuming: entry.services.iter().filter(|s| s.is_consuming()).count(),
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    async fn stop_services(&self, name: &str, services: &[Arc<MessageProcessorService>]) {
        join_all(services.iter().map(|service| service.stop())).await;
        info!(group = %name, "Processor group stopped");
    }

    fn update_gauge(&self, name: &str, services: &[Arc<MessageProcessorService>]) {
        let consuming = services.iter().filter(|s| s.is_consuming()).count();
        processor_metrics::set_consuming_services(name, consuming);
    }
}
