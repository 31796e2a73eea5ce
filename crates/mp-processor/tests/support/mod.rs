//! Mock collaborators shared by the processor integration tests.
//!
//! Every mock appends to one [`EventLog`] so tests can assert on the exact
//! order of transaction, pool and transport calls.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use mp_common::{Destination, Message};
use mp_processor::{
    current_session, ContextBindings, ExecutionContext, HandlerResolver, MessageHandler,
    MessageProcessorGroup, MessageProcessorService, ProcessorError, ProcessorGroupConfig,
    RuntimePool, StartContext, Transaction, TransactionCoordinator, SESSION_KEY,
};
use mp_transport::{
    Connection, MessageConsumer, MessageListener, TransportError, XaResource, XaSession, Xid,
};

// ============================================================================
// Event log
// ============================================================================

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Event names without their `:detail` suffix
    pub fn names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|e| e.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| *n == name).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.count(name) > 0
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names().iter().position(|n| n == name)
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

// ============================================================================
// Transport
// ============================================================================

pub struct MockResource {
    log: EventLog,
}

#[async_trait]
impl XaResource for MockResource {
    fn resource_id(&self) -> &str {
        "mock-session"
    }

    async fn start(&self, _xid: &Xid) -> mp_transport::Result<()> {
        self.log.push("xa.start");
        Ok(())
    }

    async fn commit(&self, _xid: &Xid, one_phase: bool) -> mp_transport::Result<()> {
        self.log.push(format!("xa.commit:{}", one_phase));
        Ok(())
    }

    async fn rollback(&self, _xid: &Xid) -> mp_transport::Result<()> {
        self.log.push("xa.rollback");
        Ok(())
    }
}

pub struct MockConsumer {
    log: EventLog,
    pub durable: bool,
    listener: Mutex<Option<Arc<dyn MessageListener>>>,
    pub fail_set_listener: bool,
    pub fail_close: bool,
    closed: AtomicBool,
}

impl MockConsumer {
    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver through the registered listener, as the transport would.
    pub async fn deliver(&self, message: Message) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_message(message).await;
        }
    }
}

#[async_trait]
impl MessageConsumer for MockConsumer {
    fn set_listener(&self, listener: Arc<dyn MessageListener>) -> mp_transport::Result<()> {
        if self.fail_set_listener {
            return Err(TransportError::Consumer("listener rejected".to_string()));
        }
        self.log.push("consumer.set_listener");
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    async fn close(&self) -> mp_transport::Result<()> {
        self.log.push("consumer.close");
        self.closed.store(true, Ordering::SeqCst);
        self.listener.lock().take();
        if self.fail_close {
            return Err(TransportError::Consumer("close failed".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct TransportFaults {
    pub fail_session: AtomicBool,
    pub fail_consumer: AtomicBool,
    pub fail_set_listener: AtomicBool,
    pub fail_close: AtomicBool,
    pub session_delay_ms: AtomicU32,
    /// When non-zero, sessions beyond this many fail to open
    pub session_limit: AtomicU32,
}

pub struct MockSession {
    log: EventLog,
    faults: Arc<TransportFaults>,
    resource: Arc<MockResource>,
    pub consumers: Mutex<Vec<Arc<MockConsumer>>>,
    pub sent: Mutex<Vec<(Destination, Message)>>,
    closed: AtomicBool,
}

impl MockSession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn consumer(&self) -> Arc<MockConsumer> {
        self.consumers.lock().last().cloned().expect("no consumer created")
    }

    fn new_consumer(&self, durable: bool) -> mp_transport::Result<Arc<dyn MessageConsumer>> {
        if self.faults.fail_consumer.load(Ordering::SeqCst) {
            return Err(TransportError::Consumer("destination does not exist".to_string()));
        }
        let consumer = Arc::new(MockConsumer {
            log: self.log.clone(),
            durable,
            listener: Mutex::new(None),
            fail_set_listener: self.faults.fail_set_listener.load(Ordering::SeqCst),
            fail_close: self.faults.fail_close.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().push(consumer.clone());
        let consumer: Arc<dyn MessageConsumer> = consumer;
        Ok(consumer)
    }
}

#[async_trait]
impl XaSession for MockSession {
    fn xa_resource(&self) -> Arc<dyn XaResource> {
        self.resource.clone()
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> mp_transport::Result<Arc<dyn MessageConsumer>> {
        self.log.push(format!(
            "session.create_consumer:{}:{}",
            destination,
            selector.unwrap_or("")
        ));
        self.new_consumer(false)
    }

    async fn create_durable_subscriber(
        &self,
        topic: &str,
        subscription_name: &str,
        selector: Option<&str>,
    ) -> mp_transport::Result<Arc<dyn MessageConsumer>> {
        self.log.push(format!(
            "session.create_durable_subscriber:{}:{}:{}",
            topic,
            subscription_name,
            selector.unwrap_or("")
        ));
        self.new_consumer(true)
    }

    async fn send(&self, destination: &Destination, message: Message) -> mp_transport::Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.log.push("session.send");
        self.sent.lock().push((destination.clone(), message));
        Ok(())
    }

    async fn close(&self) -> mp_transport::Result<()> {
        self.log.push("session.close");
        self.closed.store(true, Ordering::SeqCst);
        if self.faults.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Session("close failed".to_string()));
        }
        Ok(())
    }
}

pub struct MockConnection {
    log: EventLog,
    pub faults: Arc<TransportFaults>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockConnection {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            faults: Arc::new(TransportFaults::default()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn session(&self) -> Arc<MockSession> {
        self.sessions.lock().last().cloned().expect("no session created")
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn create_xa_session(&self) -> mp_transport::Result<Arc<dyn XaSession>> {
        let delay = self.faults.session_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let limit = self.faults.session_limit.load(Ordering::SeqCst);
        let over_limit = limit > 0 && self.session_count() >= limit as usize;
        if self.faults.fail_session.load(Ordering::SeqCst) || over_limit {
            return Err(TransportError::Connection("broker unreachable".to_string()));
        }
        self.log.push("connection.create_xa_session");
        let session = Arc::new(MockSession {
            log: self.log.clone(),
            faults: self.faults.clone(),
            resource: Arc::new(MockResource { log: self.log.clone() }),
            consumers: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.sessions.lock().push(session.clone());
        let session: Arc<dyn XaSession> = session;
        Ok(session)
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Default)]
pub struct TransactionFaults {
    pub fail_begin: AtomicBool,
    pub fail_enlist: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
    pub fail_suspend: AtomicBool,
}

pub struct MockCoordinator {
    log: EventLog,
    pub faults: TransactionFaults,
    enlisted: Mutex<Vec<(Transaction, Arc<dyn XaResource>)>>,
}

impl MockCoordinator {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            faults: TransactionFaults::default(),
            enlisted: Mutex::new(Vec::new()),
        }
    }

    fn take_resources(&self, tx: &Transaction) -> Vec<Arc<dyn XaResource>> {
        let mut enlisted = self.enlisted.lock();
        let (matching, rest): (Vec<_>, Vec<_>) = enlisted.drain(..).partition(|(t, _)| t == tx);
        *enlisted = rest;
        matching.into_iter().map(|(_, r)| r).collect()
    }

    pub fn unresolved(&self) -> usize {
        self.enlisted.lock().len()
    }
}

fn tx_error(what: &str) -> ProcessorError {
    ProcessorError::Transaction(format!("{} failed", what))
}

#[async_trait]
impl TransactionCoordinator for MockCoordinator {
    async fn begin(&self) -> mp_processor::Result<Transaction> {
        if self.faults.fail_begin.load(Ordering::SeqCst) {
            return Err(tx_error("begin"));
        }
        self.log.push("tx.begin");
        Ok(Transaction::new())
    }

    async fn enlist(&self, transaction: &Transaction, resource: Arc<dyn XaResource>) -> mp_processor::Result<()> {
        if self.faults.fail_enlist.load(Ordering::SeqCst) {
            return Err(tx_error("enlist"));
        }
        self.log.push("tx.enlist");
        resource.start(&transaction.xid(0)).await?;
        self.enlisted.lock().push((transaction.clone(), resource));
        Ok(())
    }

    async fn commit(&self, transaction: &Transaction) -> mp_processor::Result<()> {
        if self.faults.fail_commit.load(Ordering::SeqCst) {
            return Err(tx_error("commit"));
        }
        self.log.push("tx.commit");
        let resources = self.take_resources(transaction);
        let one_phase = resources.len() == 1;
        for (branch, resource) in resources.iter().enumerate() {
            resource.commit(&transaction.xid(branch as u32), one_phase).await?;
        }
        Ok(())
    }

    async fn rollback(&self, transaction: &Transaction) -> mp_processor::Result<()> {
        self.log.push("tx.rollback");
        if self.faults.fail_rollback.load(Ordering::SeqCst) {
            return Err(tx_error("rollback"));
        }
        for (branch, resource) in self.take_resources(transaction).iter().enumerate() {
            resource.rollback(&transaction.xid(branch as u32)).await?;
        }
        Ok(())
    }

    async fn suspend(&self, _transaction: &Transaction) -> mp_processor::Result<()> {
        self.log.push("tx.suspend");
        if self.faults.fail_suspend.load(Ordering::SeqCst) {
            return Err(tx_error("suspend"));
        }
        Ok(())
    }
}

// ============================================================================
// Runtime pool
// ============================================================================

pub struct TestContext {
    id: String,
    bindings: ContextBindings,
}

impl ExecutionContext for TestContext {
    fn id(&self) -> &str {
        &self.id
    }

    fn bindings(&self) -> &ContextBindings {
        &self.bindings
    }
}

pub struct MockPool {
    log: EventLog,
    available: Semaphore,
    next_id: AtomicU32,
    pub borrowed: AtomicU32,
    pub returned: AtomicU32,
    /// Contexts handed back with a session still bound
    pub returned_dirty: AtomicU32,
    pub fail_return: AtomicBool,
    /// Signalled whenever a borrow starts waiting
    pub borrow_started: Notify,
}

impl MockPool {
    pub fn new(log: EventLog, size: usize) -> Self {
        Self {
            log,
            available: Semaphore::new(size),
            next_id: AtomicU32::new(0),
            borrowed: AtomicU32::new(0),
            returned: AtomicU32::new(0),
            returned_dirty: AtomicU32::new(0),
            fail_return: AtomicBool::new(false),
            borrow_started: Notify::new(),
        }
    }

    /// Make one more context available
    pub fn release_one(&self) {
        self.available.add_permits(1);
    }

    pub fn borrowed(&self) -> u32 {
        self.borrowed.load(Ordering::SeqCst)
    }

    pub fn returned(&self) -> u32 {
        self.returned.load(Ordering::SeqCst)
    }

    pub async fn wait_for_returns(&self, expected: u32) {
        for _ in 0..100 {
            if self.returned() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl RuntimePool for MockPool {
    fn name(&self) -> &str {
        "mock-pool"
    }

    async fn borrow_context(&self) -> mp_processor::Result<Box<dyn ExecutionContext>> {
        self.log.push("pool.borrow");
        self.borrow_started.notify_one();
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|e| ProcessorError::Pool(e.to_string()))?;
        permit.forget();

        self.borrowed.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestContext {
            id: format!("ctx-{}", id),
            bindings: ContextBindings::new(),
        }))
    }

    async fn return_context(&self, context: Box<dyn ExecutionContext>) -> mp_processor::Result<()> {
        self.log.push(format!("pool.return:{}", context.id()));
        if context.bindings().contains(SESSION_KEY) {
            self.returned_dirty.fetch_add(1, Ordering::SeqCst);
        }
        self.returned.fetch_add(1, Ordering::SeqCst);
        self.available.add_permits(1);
        if self.fail_return.load(Ordering::SeqCst) {
            return Err(ProcessorError::Pool("pool is shutting down".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Handler
// ============================================================================

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    Sleep(Duration),
    Reply(Destination),
}

pub struct RecordingHandler {
    log: EventLog,
    behavior: Mutex<Behavior>,
    /// Behavior for the next call only, then back to `behavior`
    next: Mutex<Option<Behavior>>,
    pub calls: AtomicU32,
    pub saw_session: Mutex<Vec<bool>>,
}

impl RecordingHandler {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            behavior: Mutex::new(Behavior::Succeed),
            next: Mutex::new(None),
            calls: AtomicU32::new(0),
            saw_session: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn next_call(&self, behavior: Behavior) {
        *self.next.lock() = Some(behavior);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn process(&self, context: &dyn ExecutionContext, message: &Message) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("handler.process:{}", message.id));

        let session = current_session(context);
        self.saw_session.lock().push(session.is_some());

        let behavior = self
            .next
            .lock()
            .take()
            .unwrap_or_else(|| self.behavior.lock().clone());

        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => anyhow::bail!("handler rejected {}", message.id),
            Behavior::Panic => panic!("handler blew up on {}", message.id),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Behavior::Reply(destination) => {
                let session = session.ok_or_else(|| anyhow::anyhow!("no session bound"))?;
                let reply = Message::new(destination.clone(), format!("re: {}", message.body));
                session.send(&destination, reply).await?;
                Ok(())
            }
        }
    }
}

pub struct MockResolver {
    log: EventLog,
    handler: Arc<RecordingHandler>,
    pub fail: AtomicBool,
    pub panic: AtomicBool,
}

#[async_trait]
impl HandlerResolver for MockResolver {
    async fn resolve(&self, context: &dyn ExecutionContext) -> mp_processor::Result<Arc<dyn MessageHandler>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProcessorError::Resolution(format!("no handler on {}", context.id())));
        }
        if self.panic.load(Ordering::SeqCst) {
            panic!("resolver blew up on {}", context.id());
        }
        self.log.push(format!("resolver.resolve:{}", context.id()));
        let handler: Arc<dyn MessageHandler> = self.handler.clone();
        Ok(handler)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub log: EventLog,
    pub connection: Arc<MockConnection>,
    pub coordinator: Arc<MockCoordinator>,
    pub pool: Arc<MockPool>,
    pub handler: Arc<RecordingHandler>,
    pub resolver: Arc<MockResolver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_pool_size(4)
    }

    pub fn with_pool_size(size: usize) -> Self {
        mp_common::logging::init_test_logging();

        let log = EventLog::default();
        let handler = Arc::new(RecordingHandler::new(log.clone()));
        Self {
            connection: Arc::new(MockConnection::new(log.clone())),
            coordinator: Arc::new(MockCoordinator::new(log.clone())),
            pool: Arc::new(MockPool::new(log.clone(), size)),
            resolver: Arc::new(MockResolver {
                log: log.clone(),
                handler: handler.clone(),
                fail: AtomicBool::new(false),
                panic: AtomicBool::new(false),
            }),
            handler,
            log,
        }
    }

    pub fn group(&self, config: ProcessorGroupConfig) -> Arc<MessageProcessorGroup> {
        MessageProcessorGroup::builder(config)
            .connection(self.connection.clone())
            .runtime_pool(self.pool.clone())
            .resolver(self.resolver.clone())
            .transactions(self.coordinator.clone())
            .build()
            .expect("valid group")
    }

    pub fn service(&self, config: ProcessorGroupConfig) -> Arc<MessageProcessorService> {
        MessageProcessorService::new(self.group(config))
    }

    /// Start a service over a plain queue and clear the startup events.
    pub async fn started_service(&self) -> Arc<MessageProcessorService> {
        let service = self.service(orders_config());
        start(&service).await.expect("service starts");
        self.log.clear();
        service
    }
}

pub async fn start(service: &Arc<MessageProcessorService>) -> mp_processor::Result<()> {
    let (context, completion) = StartContext::new(service.service_name());
    service.start(context);
    completion.wait().await
}

pub fn orders_config() -> ProcessorGroupConfig {
    ProcessorGroupConfig::new("orders", Destination::queue("/queues/orders"))
}

pub fn order(id: &str) -> Message {
    Message::new(Destination::queue("/queues/orders"), format!("order {}", id)).with_id(id)
}
