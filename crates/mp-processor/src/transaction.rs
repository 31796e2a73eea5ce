//! Distributed transaction capability
//!
//! The coordinator owns the two-phase-commit protocol. Transactions are
//! carried as explicit [`Transaction`] handles rather than being associated
//! with the calling thread; `suspend` detaches the handle from the caller
//! once the delivery is finished with it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mp_transport::{XaResource, Xid};
use uuid::Uuid;

use crate::Result;

/// Handle on one in-progress distributed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: Uuid,
    began_at: Instant,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            began_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Branch identifier for the `branch`-th enlisted resource
    pub fn xid(&self, branch: u32) -> Xid {
        Xid::new(self.id, branch)
    }

    pub fn age(&self) -> Duration {
        self.began_at.elapsed()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.id)
    }
}

#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    async fn begin(&self) -> Result<Transaction>;

    async fn enlist(&self, transaction: &Transaction, resource: Arc<dyn XaResource>) -> Result<()>;

    async fn commit(&self, transaction: &Transaction) -> Result<()>;

    async fn rollback(&self, transaction: &Transaction) -> Result<()>;

    /// Detach the transaction from the caller without resolving it.
    async fn suspend(&self, transaction: &Transaction) -> Result<()>;
}
