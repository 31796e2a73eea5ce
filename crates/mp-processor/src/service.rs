//! MessageProcessorService - transactional delivery of one destination
//!
//! Each delivered message runs inside its own distributed transaction on an
//! exclusively borrowed execution context:
//!
//! begin → enlist session → borrow context → resolve handler → bind session
//! → process → commit (or rollback) → suspend → unbind → return context
//!
//! Stop may race with delivery. The consumer slot is cleared before anything
//! is closed, and a delivery checks it twice: on entry, and again after the
//! (possibly long) wait for an execution context. A delivery that finds the
//! processor stopped after borrowing abandons its transaction without
//! rollback, because the session may already be closed.
//!
//! Start and stop are serialized through a start generation: `stop` bumps it,
//! and an `open` that finds its generation stale when it is ready to install
//! closes what it created instead.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use mp_common::Message;
use mp_transport::{MessageConsumer, MessageListener, XaSession};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::context::SessionBinding;
use crate::group::MessageProcessorGroup;
use crate::lifecycle::StartContext;
use crate::pool::ContextLease;
use crate::processor_metrics;
use crate::transaction::Transaction;
use crate::{ProcessorError, Result};

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The processor was stopped; nothing was touched
    Skipped,
    /// The handler succeeded and the transaction committed
    Committed,
    /// Processing failed; the transaction, if begun, was rolled back
    RolledBack,
    /// Stopped while waiting for a context; the transaction was left to the
    /// coordinator without rollback
    Abandoned,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Skipped => "skipped",
            DeliveryOutcome::Committed => "committed",
            DeliveryOutcome::RolledBack => "rolled_back",
            DeliveryOutcome::Abandoned => "abandoned",
        }
    }
}

enum EnvelopeEnd {
    Committed,
    Abandoned,
}

#[derive(Debug, Default)]
struct StartState {
    /// Bumped by every stop; an open only installs for its own generation
    generation: u64,
    starting: bool,
}

pub struct MessageProcessorService {
    group: Arc<MessageProcessorGroup>,
    instance: u32,
    start_state: Mutex<StartState>,
    session: RwLock<Option<Arc<dyn XaSession>>>,
    consumer: RwLock<Option<Arc<dyn MessageConsumer>>>,
}

impl MessageProcessorService {
    pub fn new(group: Arc<MessageProcessorGroup>) -> Arc<Self> {
        Self::with_instance(group, 0)
    }

    /// `instance` distinguishes the services of one group in logs.
    pub fn with_instance(group: Arc<MessageProcessorGroup>, instance: u32) -> Arc<Self> {
        Arc::new(Self {
            group,
            instance,
            start_state: Mutex::new(StartState::default()),
            session: RwLock::new(None),
            consumer: RwLock::new(None),
        })
    }

    pub fn group(&self) -> &Arc<MessageProcessorGroup> {
        &self.group
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn service_name(&self) -> String {
        format!("{}#{}", self.group.name(), self.instance)
    }

    /// Whether a consumer is registered and deliveries will be processed
    pub fn is_consuming(&self) -> bool {
        self.consumer.read().is_some()
    }

    /// Start asynchronously; the outcome is reported through `context`.
    pub fn start(self: &Arc<Self>, context: StartContext) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            match service.open().await {
                Ok(()) => {
                    info!(
                        group = %service.group.name(),
                        instance = service.instance,
                        destination = %service.group.destination(),
                        "Message processor started"
                    );
                    processor_metrics::record_start(service.group.name(), true);
                    context.complete();
                }
                Err(e) => {
                    error!(
                        group = %service.group.name(),
                        instance = service.instance,
                        error = %e,
                        "Failed to start message processor"
                    );
                    processor_metrics::record_start(service.group.name(), false);
                    context.failed(e);
                }
            }
        });
    }

    /// Open the session and consumer and register for delivery.
    async fn open(self: &Arc<Self>) -> Result<()> {
        let generation = self.claim_start()?;

        let session = match self.group.connection().create_xa_session().await {
            Ok(session) => session,
            Err(e) => {
                self.release_start(generation);
                return Err(e.into());
            }
        };

        let consumer = match self.create_consumer(&session).await {
            Ok(consumer) => consumer,
            Err(e) => {
                self.release_start(generation);
                self.close_session(session).await;
                return Err(e);
            }
        };

        if let Err(e) = self.install(generation, &session, &consumer) {
            self.close_consumer(consumer).await;
            self.close_session(session).await;
            return Err(e);
        }

        Ok(())
    }

    /// Mark a start in progress; rejects a start while consuming or starting.
    fn claim_start(&self) -> Result<u64> {
        let mut state = self.start_state.lock();
        if state.starting || self.is_consuming() {
            return Err(ProcessorError::AlreadyStarted(self.service_name()));
        }
        state.starting = true;
        Ok(state.generation)
    }

    fn release_start(&self, generation: u64) {
        let mut state = self.start_state.lock();
        if state.generation == generation {
            state.starting = false;
        }
    }

    /// Publish the slots and register the listener, unless a stop has
    /// happened since `generation` was claimed.
    fn install(
        self: &Arc<Self>,
        generation: u64,
        session: &Arc<dyn XaSession>,
        consumer: &Arc<dyn MessageConsumer>,
    ) -> Result<()> {
        let mut state = self.start_state.lock();
        if state.generation != generation {
            return Err(ProcessorError::StartAborted(self.service_name()));
        }
        state.starting = false;

        *self.session.write() = Some(Arc::clone(session));
        *self.consumer.write() = Some(Arc::clone(consumer));

        let listener: Arc<dyn MessageListener> = Arc::new(ServiceListener {
            service: Arc::downgrade(self),
        });
        if let Err(e) = consumer.set_listener(listener) {
            self.consumer.write().take();
            self.session.write().take();
            return Err(e.into());
        }
        Ok(())
    }

    async fn create_consumer(&self, session: &Arc<dyn XaSession>) -> Result<Arc<dyn MessageConsumer>> {
        let group = &self.group;
        let destination = group.destination();
        let selector = group.message_selector();

        if group.is_durable() && destination.is_topic() {
            debug!(
                group = %group.name(),
                topic = %destination.name(),
                "Creating durable subscriber"
            );
            let consumer = session
                .create_durable_subscriber(destination.name(), group.name(), selector)
                .await?;
            return Ok(consumer);
        }

        if group.is_durable() {
            warn!(
                group = %group.name(),
                destination = %destination,
                "Durable set for processor, but destination is not a topic - ignoring"
            );
        }
        Ok(session.create_consumer(destination, selector).await?)
    }

    /// The session to process with, or `None` once stop has cleared the consumer.
    fn active_session(&self) -> Option<Arc<dyn XaSession>> {
        if !self.is_consuming() {
            return None;
        }
        self.session.read().clone()
    }

    /// Run the transactional envelope for one message.
    ///
    /// Never fails: every error is logged and folded into the outcome.
    pub async fn handle_delivery(&self, message: Message) -> DeliveryOutcome {
        let Some(session) = self.active_session() else {
            debug!(
                group = %self.group.name(),
                message_id = %message.id,
                "Processor stopped, ignoring delivery"
            );
            return DeliveryOutcome::Skipped;
        };

        let started = Instant::now();
        let transactions = self.group.transactions();
        let mut transaction: Option<Transaction> = None;
        let mut lease: Option<ContextLease> = None;

        let envelope = AssertUnwindSafe(self.run_envelope(
            &session,
            &message,
            &mut transaction,
            &mut lease,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(ProcessorError::HandlerPanicked(panic_message(panic.as_ref())))
        });

        let outcome = match envelope {
            Ok(EnvelopeEnd::Committed) => DeliveryOutcome::Committed,
            Ok(EnvelopeEnd::Abandoned) => {
                warn!(
                    group = %self.group.name(),
                    message_id = %message.id,
                    "Processor stopped while waiting for an execution context, abandoning transaction"
                );
                DeliveryOutcome::Abandoned
            }
            Err(e) => {
                error!(
                    group = %self.group.name(),
                    message_id = %message.id,
                    error = %e,
                    "Message processing failed, rolling back"
                );
                if let Some(tx) = &transaction {
                    if let Err(rollback_err) = transactions.rollback(tx).await {
                        warn!(
                            group = %self.group.name(),
                            transaction = %tx,
                            error = %rollback_err,
                            "Rollback failed"
                        );
                        processor_metrics::record_cleanup_failure(self.group.name(), "rollback");
                    }
                }
                DeliveryOutcome::RolledBack
            }
        };

        if let Some(tx) = &transaction {
            if let Err(e) = transactions.suspend(tx).await {
                debug!(
                    group = %self.group.name(),
                    transaction = %tx,
                    error = %e,
                    "Transaction suspend failed"
                );
                processor_metrics::record_cleanup_failure(self.group.name(), "suspend");
            }
        }

        if let Some(lease) = lease {
            lease.context().bindings().remove(crate::SESSION_KEY);
            lease.release().await;
        }

        processor_metrics::record_delivery(self.group.name(), outcome.as_str(), started.elapsed());
        outcome
    }

    async fn run_envelope(
        &self,
        session: &Arc<dyn XaSession>,
        message: &Message,
        transaction: &mut Option<Transaction>,
        lease: &mut Option<ContextLease>,
    ) -> Result<EnvelopeEnd> {
        let transactions = self.group.transactions();

        let tx = transaction.insert(transactions.begin().await?);
        transactions.enlist(tx, session.xa_resource()).await?;

        let lease = lease.insert(
            ContextLease::acquire(Arc::clone(self.group.runtime_pool()), self.group.name_arc()).await?,
        );

        if !self.is_consuming() {
            return Ok(EnvelopeEnd::Abandoned);
        }

        let context = lease.context();
        let handler = self.group.resolver().resolve(context).await?;

        let mut binding = SessionBinding::bind(context, Arc::clone(session));
        let handler_started = Instant::now();
        let processed = handler.process(context, message).await;
        processor_metrics::record_handler_duration(self.group.name(), handler_started.elapsed());
        processed.map_err(ProcessorError::Handler)?;

        binding.unbind();
        transactions.commit(tx).await?;
        Ok(EnvelopeEnd::Committed)
    }

    /// Unregister and close; best-effort, never fails.
    ///
    /// A start still in flight is aborted and closes its own resources.
    pub async fn stop(&self) {
        {
            let mut state = self.start_state.lock();
            state.generation += 1;
            state.starting = false;
        }

        let consumer = self.consumer.write().take();
        if let Some(consumer) = consumer {
            self.close_consumer(consumer).await;
        }

        let session = self.session.write().take();
        if let Some(session) = session {
            self.close_session(session).await;
        }

        info!(
            group = %self.group.name(),
            instance = self.instance,
            "Message processor stopped"
        );
    }

    async fn close_consumer(&self, consumer: Arc<dyn MessageConsumer>) {
        if let Err(e) = consumer.close().await {
            error!(group = %self.group.name(), error = %e, "Error closing consumer connection");
        }
    }

    async fn close_session(&self, session: Arc<dyn XaSession>) {
        if let Err(e) = session.close().await {
            error!(group = %self.group.name(), error = %e, "Error closing consumer session");
        }
    }
}

#[async_trait]
impl MessageListener for MessageProcessorService {
    async fn on_message(&self, message: Message) {
        self.handle_delivery(message).await;
    }
}

/// Listener registered with the transport; does not keep the service alive.
struct ServiceListener {
    service: Weak<MessageProcessorService>,
}

#[async_trait]
impl MessageListener for ServiceListener {
    async fn on_message(&self, message: Message) {
        match self.service.upgrade() {
            Some(service) => service.on_message(message).await,
            None => debug!(message_id = %message.id, "Processor dropped, ignoring delivery"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
