//! Runtime pool capability and the lease that guards one borrowed context
//!
//! The pool's allocation, growth and eviction policy belong to its
//! implementation. The processor only relies on: `borrow_context` may wait
//! for capacity without a deadline, and `return_context` accepts every
//! context it handed out, including ones whose delivery was abandoned.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::context::{ExecutionContext, SESSION_KEY};
use crate::processor_metrics;
use crate::Result;

/// Pool of reusable execution contexts, shared by any number of processors.
#[async_trait]
pub trait RuntimePool: Send + Sync {
    fn name(&self) -> &str;

    /// Lease one context exclusively; may wait until one is available.
    async fn borrow_context(&self) -> Result<Box<dyn ExecutionContext>>;

    async fn return_context(&self, context: Box<dyn ExecutionContext>) -> Result<()>;
}

/// One borrowed context, returned to its pool exactly once.
///
/// [`release`](Self::release) is the normal path. If a lease is dropped
/// while still holding its context (the delivery future was cancelled or a
/// panic unwound through it), the context is handed back on the current
/// tokio runtime instead.
pub struct ContextLease {
    pool: Arc<dyn RuntimePool>,
    context: Option<Box<dyn ExecutionContext>>,
    group: Arc<str>,
}

impl ContextLease {
    pub async fn acquire(pool: Arc<dyn RuntimePool>, group: Arc<str>) -> Result<Self> {
        let context = pool.borrow_context().await?;
        debug!(group = %group, pool = %pool.name(), context = %context.id(), "Borrowed execution context");
        Ok(Self {
            pool,
            context: Some(context),
            group,
        })
    }

    pub fn context(&self) -> &dyn ExecutionContext {
        self.context
            .as_deref()
            .expect("lease holds its context until released")
    }

    /// Hand the context back; failures are logged, never raised.
    ///
    /// Returns whether the pool accepted the context.
    pub async fn release(mut self) -> bool {
        let Some(context) = self.context.take() else {
            return true;
        };
        return_to_pool(Arc::clone(&self.pool), context, Arc::clone(&self.group)).await
    }
}

async fn return_to_pool(
    pool: Arc<dyn RuntimePool>,
    context: Box<dyn ExecutionContext>,
    group: Arc<str>,
) -> bool {
    let context_id = context.id().to_string();
    match pool.return_context(context).await {
        Ok(()) => {
            debug!(group = %group, pool = %pool.name(), context = %context_id, "Returned execution context");
            true
        }
        Err(e) => {
            warn!(
                group = %group,
                pool = %pool.name(),
                context = %context_id,
                error = %e,
                "Failed to return execution context, possible resource leak"
            );
            processor_metrics::record_cleanup_failure(&group, "return_context");
            false
        }
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };

        context.bindings().remove(SESSION_KEY);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    group = %self.group,
                    context = %context.id(),
                    "Execution context lease dropped before release, returning in background"
                );
                handle.spawn(return_to_pool(
                    Arc::clone(&self.pool),
                    context,
                    Arc::clone(&self.group),
                ));
            }
            Err(_) => {
                error!(
                    group = %self.group,
                    context = %context.id(),
                    "Execution context lease dropped outside a runtime, context leaked"
                );
                processor_metrics::record_cleanup_failure(&self.group, "return_context");
            }
        }
    }
}
