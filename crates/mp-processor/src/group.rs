//! Message processor group: one destination bound to its collaborators
//!
//! Immutable once built. Every service started for the group shares the same
//! connection, runtime pool, resolver and transaction coordinator.

use std::fmt;
use std::sync::Arc;

use mp_common::Destination;
use mp_config::ProcessorGroupConfig;
use mp_transport::Connection;

use crate::pool::RuntimePool;
use crate::resolver::HandlerResolver;
use crate::transaction::TransactionCoordinator;
use crate::{ProcessorError, Result};

pub struct MessageProcessorGroup {
    config: ProcessorGroupConfig,
    name: Arc<str>,
    connection: Arc<dyn Connection>,
    runtime_pool: Arc<dyn RuntimePool>,
    resolver: Arc<dyn HandlerResolver>,
    transactions: Arc<dyn TransactionCoordinator>,
}

impl MessageProcessorGroup {
    pub fn builder(config: ProcessorGroupConfig) -> MessageProcessorGroupBuilder {
        MessageProcessorGroupBuilder {
            config,
            connection: None,
            runtime_pool: None,
            resolver: None,
            transactions: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn config(&self) -> &ProcessorGroupConfig {
        &self.config
    }

    pub fn destination(&self) -> &Destination {
        &self.config.destination
    }

    pub fn is_durable(&self) -> bool {
        self.config.durable
    }

    pub fn message_selector(&self) -> Option<&str> {
        self.config.selector.as_deref()
    }

    pub fn concurrency(&self) -> u32 {
        self.config.concurrency
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn runtime_pool(&self) -> &Arc<dyn RuntimePool> {
        &self.runtime_pool
    }

    pub fn resolver(&self) -> &Arc<dyn HandlerResolver> {
        &self.resolver
    }

    pub fn transactions(&self) -> &Arc<dyn TransactionCoordinator> {
        &self.transactions
    }
}

impl fmt::Debug for MessageProcessorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProcessorGroup")
            .field("config", &self.config)
            .field("runtime_pool", &self.runtime_pool.name())
            .finish_non_exhaustive()
    }
}

pub struct MessageProcessorGroupBuilder {
    config: ProcessorGroupConfig,
    connection: Option<Arc<dyn Connection>>,
    runtime_pool: Option<Arc<dyn RuntimePool>>,
    resolver: Option<Arc<dyn HandlerResolver>>,
    transactions: Option<Arc<dyn TransactionCoordinator>>,
}

impl MessageProcessorGroupBuilder {
    pub fn connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn runtime_pool(mut self, runtime_pool: Arc<dyn RuntimePool>) -> Self {
        self.runtime_pool = Some(runtime_pool);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn HandlerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn transactions(mut self, transactions: Arc<dyn TransactionCoordinator>) -> Self {
        self.transactions = Some(transactions);
        self
    }

    pub fn build(self) -> Result<Arc<MessageProcessorGroup>> {
        self.config.validate()?;
        let name = self.config.name.clone();
        let missing = |what: &str| ProcessorError::Config(format!("processor {} has no {}", name, what));

        let connection = self.connection.ok_or_else(|| missing("connection"))?;
        let runtime_pool = self.runtime_pool.ok_or_else(|| missing("runtime pool"))?;
        let resolver = self.resolver.ok_or_else(|| missing("handler resolver"))?;
        let transactions = self.transactions.ok_or_else(|| missing("transaction coordinator"))?;

        Ok(Arc::new(MessageProcessorGroup {
            name: Arc::from(self.config.name.as_str()),
            config: self.config,
            connection,
            runtime_pool,
            resolver,
            transactions,
        }))
    }
}
