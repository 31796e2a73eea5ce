//! Transactional message processor
//!
//! This crate binds a message destination to a pool of reusable execution
//! contexts and processes every delivery inside its own distributed
//! transaction:
//! - MessageProcessorService: the per-consumer delivery envelope and start/stop
//! - MessageProcessorGroup: destination, selector, durability and collaborators
//! - ProcessorManager: starts and stops the services of many groups
//! - ContextLease / RuntimePool: exclusive borrow and guaranteed return of contexts
//! - ContextBindings: per-context slots exposing the delivering session to handlers
//! - StartContext / StartCompletion: asynchronous start signalling

pub mod error;
pub mod context;
pub mod pool;
pub mod resolver;
pub mod transaction;
pub mod group;
pub mod lifecycle;
pub mod service;
pub mod manager;
pub mod processor_metrics;

pub use error::ProcessorError;
pub use context::{current_session, ContextBindings, ExecutionContext, SessionBinding, SESSION_KEY};
pub use pool::{ContextLease, RuntimePool};
pub use resolver::{HandlerResolver, MessageHandler};
pub use transaction::{Transaction, TransactionCoordinator};
pub use group::{MessageProcessorGroup, MessageProcessorGroupBuilder};
pub use lifecycle::{StartCompletion, StartContext};
pub use service::{DeliveryOutcome, MessageProcessorService};
pub use manager::{GroupStatus, ProcessorManager};

pub use mp_config::{LifecycleConfig, ProcessorGroupConfig};

pub type Result<T> = std::result::Result<T, ProcessorError>;
