use std::sync::Arc;

use async_trait::async_trait;
use mp_common::Message;

use crate::context::ExecutionContext;
use crate::Result;

/// Business logic for one message, running on a leased execution context.
///
/// The delivering session is reachable through
/// [`current_session`](crate::current_session) for the duration of the call.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn process(&self, context: &dyn ExecutionContext, message: &Message) -> anyhow::Result<()>;
}

/// Finds the handler instance that lives on a given execution context.
#[async_trait]
pub trait HandlerResolver: Send + Sync {
    async fn resolve(&self, context: &dyn ExecutionContext) -> Result<Arc<dyn MessageHandler>>;
}
