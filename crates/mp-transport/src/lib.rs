//! Transport capabilities consumed by message processors.
//!
//! A broker binding implements these traits; the processor core only ever
//! talks to them. Sessions are transactional (XA): each exposes an
//! [`XaResource`] that a transaction coordinator enlists.

use async_trait::async_trait;
use mp_common::{Destination, Message};
use std::fmt;
use std::sync::Arc;

pub mod error;

pub use error::TransportError;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Global transaction branch identifier handed to XA resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Xid {
    pub global_id: uuid::Uuid,
    pub branch: u32,
}

impl Xid {
    pub fn new(global_id: uuid::Uuid, branch: u32) -> Self {
        Self { global_id, branch }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.global_id, self.branch)
    }
}

/// Transactional resource of a session, driven by the transaction coordinator.
#[async_trait]
pub trait XaResource: Send + Sync {
    /// Identifier used in logs and by coordinators to deduplicate enlistment
    fn resource_id(&self) -> &str;

    /// Associate subsequent session work with `xid`
    async fn start(&self, xid: &Xid) -> Result<()>;

    /// Commit the branch; `one_phase` skips the prepare vote
    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()>;

    async fn rollback(&self, xid: &Xid) -> Result<()>;
}

/// Callback invoked by the transport for every delivered message.
///
/// Implementations must not fail: everything is handled internally.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, message: Message);
}

/// Factory for transactional sessions.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn create_xa_session(&self) -> Result<Arc<dyn XaSession>>;
}

/// A transactional session on a connection.
#[async_trait]
pub trait XaSession: Send + Sync {
    /// The resource to enlist in a transaction for work done on this session
    fn xa_resource(&self) -> Arc<dyn XaResource>;

    /// Create a plain consumer; `selector` semantics belong to the transport
    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> Result<Arc<dyn MessageConsumer>>;

    /// Create a durable subscription on a topic, keyed by `subscription_name`
    async fn create_durable_subscriber(
        &self,
        topic: &str,
        subscription_name: &str,
        selector: Option<&str>,
    ) -> Result<Arc<dyn MessageConsumer>>;

    /// Send within the session's current transaction
    async fn send(&self, destination: &Destination, message: Message) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A registered consumer on a destination.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Register the callback; delivery starts once this returns
    fn set_listener(&self, listener: Arc<dyn MessageListener>) -> Result<()>;

    /// Stop delivery and release the consumer
    async fn close(&self) -> Result<()>;
}
