//! Execution contexts and their contextual bindings
//!
//! An execution context is a stateful unit of work capacity leased from a
//! [`RuntimePool`](crate::RuntimePool) for exactly one delivery. Each context
//! carries a small key/value slot map ([`ContextBindings`]) that the
//! processor fills for the duration of one handler invocation, so handler
//! code can reach ambient resources (the transactional session) without them
//! being threaded through every call.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mp_transport::XaSession;
use parking_lot::Mutex;

/// Binding key under which the delivering session is published.
pub const SESSION_KEY: &str = "session";

/// A leased, stateful execution unit (interpreter, worker instance, ...).
pub trait ExecutionContext: Send + Sync {
    fn id(&self) -> &str;

    fn bindings(&self) -> &ContextBindings;
}

/// Key/value slots scoped to one execution context.
#[derive(Default)]
pub struct ContextBindings {
    slots: Mutex<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl ContextBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&self, key: &'static str, value: T) {
        self.slots.lock().insert(key, Arc::new(value));
    }

    /// Typed lookup; `None` when unset or bound to another type.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.slots
            .lock()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Returns whether a value was bound.
    pub fn remove(&self, key: &str) -> bool {
        self.slots.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl fmt::Debug for ContextBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_set().entries(slots.keys()).finish()
    }
}

/// The session bound to `context` by the delivery currently using it.
pub fn current_session(context: &dyn ExecutionContext) -> Option<Arc<dyn XaSession>> {
    context.bindings().get::<Arc<dyn XaSession>>(SESSION_KEY)
}

/// Publishes a session in a context's bindings until unbound or dropped.
pub struct SessionBinding<'a> {
    bindings: &'a ContextBindings,
    bound: bool,
}

impl<'a> SessionBinding<'a> {
    pub fn bind(context: &'a dyn ExecutionContext, session: Arc<dyn XaSession>) -> Self {
        let bindings = context.bindings();
        bindings.set(SESSION_KEY, session);
        Self {
            bindings,
            bound: true,
        }
    }

    pub fn unbind(&mut self) {
        if self.bound {
            self.bindings.remove(SESSION_KEY);
            self.bound = false;
        }
    }
}

impl Drop for SessionBinding<'_> {
    fn drop(&mut self) {
        self.unbind();
    }
}
