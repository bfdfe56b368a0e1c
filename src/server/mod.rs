//! IEC 60870-5-104 server (controlled station).
//!
//! The server accepts masters on a TCP port, runs one task per connection
//! and keeps at most one of them active. Spontaneous data is queued with
//! [`Server::enqueue_asdu`] and sent on the active connection; commands
//! from the master are dispatched to the handlers of [`ServerConfig`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voltage_iec60870::server::{Server, ServerConfig, ServerConnectionHandle};
//! use voltage_iec60870::Asdu;
//!
//! let config = ServerConfig::new().interrogation_handler(Arc::new(|conn: &ServerConnectionHandle, asdu: &Asdu, _qoi: u8| {
//!     let _ = conn.send_act_con(asdu, false);
//!     // ... send the station data
//!     let _ = conn.send_act_term(asdu);
//!     true
//! }));
//! let mut server = Server::new(config);
//! server.start().await?;
//! ```

mod connection;
mod queue;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

pub use connection::{ServerConnectionEvent, ServerConnectionHandle};

use crate::codec::RawMessageHandler;
use crate::error::{Iec104Error, Result};
use crate::parameters::{ConnectionParameters, DEFAULT_PORT};
use crate::transport::TransportSecurity;
use crate::types::{Asdu, Cp16Time2a, Cp56Time2a};
use queue::AsduQueue;

/// Default outbound queue size.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Default limit of simultaneously open connections.
pub const DEFAULT_MAX_OPEN_CONNECTIONS: usize = 10;

/// Decides whether a connecting peer is accepted.
pub type ConnectionRequestHandler = Arc<dyn Fn(SocketAddr) -> bool + Send + Sync>;

/// Reports connection lifecycle events.
pub type ServerConnectionEventHandler =
    Arc<dyn Fn(&ServerConnectionHandle, ServerConnectionEvent) + Send + Sync>;

/// Handles C_IC_NA_1 with the qualifier of interrogation. Returns true if handled.
pub type InterrogationHandler =
    Arc<dyn Fn(&ServerConnectionHandle, &Asdu, u8) -> bool + Send + Sync>;

/// Handles C_CI_NA_1 with the qualifier of counter interrogation.
pub type CounterInterrogationHandler =
    Arc<dyn Fn(&ServerConnectionHandle, &Asdu, u8) -> bool + Send + Sync>;

/// Handles C_RD_NA_1 with the requested object address.
pub type ReadHandler = Arc<dyn Fn(&ServerConnectionHandle, &Asdu, u32) -> bool + Send + Sync>;

/// Handles C_CS_NA_1 with the received time.
pub type ClockSynchronizationHandler =
    Arc<dyn Fn(&ServerConnectionHandle, &Asdu, Cp56Time2a) -> bool + Send + Sync>;

/// Handles C_RP_NA_1 with the qualifier of reset process.
pub type ResetProcessHandler = Arc<dyn Fn(&ServerConnectionHandle, &Asdu, u8) -> bool + Send + Sync>;

/// Handles C_CD_NA_1 with the received delay.
pub type DelayAcquisitionHandler =
    Arc<dyn Fn(&ServerConnectionHandle, &Asdu, Cp16Time2a) -> bool + Send + Sync>;

/// Handles any ASDU not consumed by a more specific handler.
pub type AsduHandler = Arc<dyn Fn(&ServerConnectionHandle, &Asdu) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub(crate) connection_request: Option<ConnectionRequestHandler>,
    pub(crate) connection_event: Option<ServerConnectionEventHandler>,
    pub(crate) interrogation: Option<InterrogationHandler>,
    pub(crate) counter_interrogation: Option<CounterInterrogationHandler>,
    pub(crate) read: Option<ReadHandler>,
    pub(crate) clock_sync: Option<ClockSynchronizationHandler>,
    pub(crate) reset_process: Option<ResetProcessHandler>,
    pub(crate) delay_acquisition: Option<DelayAcquisitionHandler>,
    pub(crate) asdu: Option<AsduHandler>,
    pub(crate) raw: Option<RawMessageHandler>,
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Local address to bind
    pub bind_address: String,
    /// Local port
    pub port: u16,
    /// Protocol parameters applied to every connection
    pub parameters: ConnectionParameters,
    /// Capacity of the outbound ASDU queue
    pub max_queue_size: usize,
    /// Peers beyond this number are closed right after accepting
    pub max_open_connections: usize,
    /// Optional security layer wrapping accepted streams
    pub security: Option<Arc<dyn TransportSecurity>>,
    handlers: Handlers,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("parameters", &self.parameters)
            .field("max_queue_size", &self.max_queue_size)
            .field("max_open_connections", &self.max_open_connections)
            .field("security", &self.security.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    /// Create a configuration listening on 0.0.0.0:2404.
    pub fn new() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            parameters: ConnectionParameters::default(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_open_connections: DEFAULT_MAX_OPEN_CONNECTIONS,
            security: None,
            handlers: Handlers::default(),
        }
    }

    /// Set the local bind address.
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Set the local port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set protocol parameters.
    pub fn parameters(mut self, parameters: ConnectionParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the outbound queue capacity.
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the limit of open connections.
    pub fn max_open_connections(mut self, count: usize) -> Self {
        self.max_open_connections = count;
        self
    }

    /// Secure accepted connections with `security`.
    pub fn security(mut self, security: Arc<dyn TransportSecurity>) -> Self {
        self.security = Some(security);
        self
    }

    /// Set the connection request handler.
    pub fn connection_request_handler(mut self, handler: ConnectionRequestHandler) -> Self {
        self.handlers.connection_request = Some(handler);
        self
    }

    /// Set the connection event handler.
    pub fn connection_event_handler(mut self, handler: ServerConnectionEventHandler) -> Self {
        self.handlers.connection_event = Some(handler);
        self
    }

    /// Set the interrogation handler.
    pub fn interrogation_handler(mut self, handler: InterrogationHandler) -> Self {
        self.handlers.interrogation = Some(handler);
        self
    }

    /// Set the counter interrogation handler.
    pub fn counter_interrogation_handler(mut self, handler: CounterInterrogationHandler) -> Self {
        self.handlers.counter_interrogation = Some(handler);
        self
    }

    /// Set the read handler.
    pub fn read_handler(mut self, handler: ReadHandler) -> Self {
        self.handlers.read = Some(handler);
        self
    }

    /// Set the clock synchronization handler.
    pub fn clock_sync_handler(mut self, handler: ClockSynchronizationHandler) -> Self {
        self.handlers.clock_sync = Some(handler);
        self
    }

    /// Set the reset process handler.
    pub fn reset_process_handler(mut self, handler: ResetProcessHandler) -> Self {
        self.handlers.reset_process = Some(handler);
        self
    }

    /// Set the delay acquisition handler.
    pub fn delay_acquisition_handler(mut self, handler: DelayAcquisitionHandler) -> Self {
        self.handlers.delay_acquisition = Some(handler);
        self
    }

    /// Set the generic ASDU handler.
    pub fn asdu_handler(mut self, handler: AsduHandler) -> Self {
        self.handlers.asdu = Some(handler);
        self
    }

    /// Set the raw frame observer.
    pub fn raw_handler(mut self, handler: RawMessageHandler) -> Self {
        self.handlers.raw = Some(handler);
        self
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        self.parameters.validate()?;
        if self.max_open_connections == 0 {
            return Err(Iec104Error::config("max_open_connections must be at least 1"));
        }
        if self.max_queue_size == 0 {
            return Err(Iec104Error::config("max_queue_size must be at least 1"));
        }
        Ok(())
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the accept task, connection tasks and the server handle.
pub(crate) struct Shared {
    pub(crate) parameters: ConnectionParameters,
    pub(crate) security: Option<Arc<dyn TransportSecurity>>,
    pub(crate) handlers: Handlers,
    max_open_connections: usize,
    next_id: AtomicU64,
    connections: Mutex<Vec<ServerConnectionHandle>>,
    queue: Mutex<AsduQueue>,
}

impl Shared {
    fn new(config: &ServerConfig) -> Self {
        Self {
            parameters: config.parameters,
            security: config.security.clone(),
            handlers: config.handlers.clone(),
            max_open_connections: config.max_open_connections,
            next_id: AtomicU64::new(1),
            connections: Mutex::new(Vec::new()),
            queue: Mutex::new(AsduQueue::new(config.max_queue_size)),
        }
    }

    pub(crate) fn emit(&self, handle: &ServerConnectionHandle, event: ServerConnectionEvent) {
        if let Some(handler) = &self.handlers.connection_event {
            handler(handle, event);
        }
    }

    /// Make `handle` the only active connection. The flags change under the
    /// connection lock; events are emitted after it is released.
    pub(crate) fn activate(&self, handle: &ServerConnectionHandle) {
        let siblings: Vec<ServerConnectionHandle> = {
            let connections = lock(&self.connections);
            let siblings = connections
                .iter()
                .filter(|other| other.id() != handle.id() && other.set_active(false))
                .cloned()
                .collect();
            handle.set_active(true);
            siblings
        };
        for sibling in &siblings {
            info!(peer = %sibling.peer_addr(), "deactivated by STARTDT on {}", handle.peer_addr());
            self.emit(sibling, ServerConnectionEvent::Deactivated);
        }
    }

    /// Next queued ASDU for the active connection.
    pub(crate) fn dequeue(&self) -> Option<Asdu> {
        lock(&self.queue).pop()
    }

    fn enqueue(&self, asdu: Asdu) {
        if lock(&self.queue).push(asdu).is_some() {
            warn!("ASDU queue full, dropped oldest entry");
        }
        if let Some(active) = self.active_connection() {
            active.wake();
        }
    }

    fn queued(&self) -> usize {
        lock(&self.queue).len()
    }

    fn active_connection(&self) -> Option<ServerConnectionHandle> {
        lock(&self.connections)
            .iter()
            .find(|handle| handle.is_active())
            .cloned()
    }

    fn open_connections(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Register a new peer unless the connection limit is reached.
    fn register(
        &self,
        peer: SocketAddr,
    ) -> Option<(ServerConnectionHandle, connection::CommandReceiver)> {
        let mut connections = lock(&self.connections);
        if connections.len() >= self.max_open_connections {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, commands) = ServerConnectionHandle::new(id, peer);
        connections.push(handle.clone());
        Some((handle, commands))
    }

    pub(crate) fn unregister(&self, handle: &ServerConnectionHandle) {
        lock(&self.connections).retain(|other| other.id() != handle.id());
    }

    fn close_all(&self) {
        for handle in lock(&self.connections).iter() {
            handle.close();
        }
    }
}

/// IEC 60870-5-104 server.
pub struct Server {
    config: ServerConfig,
    shared: Arc<Shared>,
    shutdown: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Create a stopped server.
    pub fn new(config: ServerConfig) -> Self {
        let shared = Arc::new(Shared::new(&config));
        Self {
            config,
            shared,
            shutdown: None,
            accept_task: None,
            local_addr: None,
        }
    }

    /// Bind the listener and start accepting masters.
    pub async fn start(&mut self) -> Result<()> {
        if self.accept_task.is_some() {
            return Err(Iec104Error::config("server already running"));
        }
        self.config.validate()?;

        let address = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&address).await?;
        let local_addr = listener.local_addr()?;
        info!("IEC 104 server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.shared.clone(),
            shutdown_rx,
        )));
        self.shutdown = Some(shutdown_tx);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// Stop accepting, close every connection and wait for their tasks.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!("accept task failed: {}", e);
            }
        }
        self.local_addr = None;
        info!("IEC 104 server stopped");
    }

    /// Whether the server is accepting connections.
    pub fn is_running(&self) -> bool {
        self.accept_task.is_some()
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Queue an ASDU for the active connection. The oldest entry is dropped
    /// when the queue is full.
    pub fn enqueue_asdu(&self, asdu: Asdu) {
        self.shared.enqueue(asdu);
    }

    /// Number of ASDUs waiting in the outbound queue.
    pub fn queued_asdus(&self) -> usize {
        self.shared.queued()
    }

    /// Number of open connections.
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections()
    }

    /// The connection that currently receives data, if any.
    pub fn active_connection(&self) -> Option<ServerConnectionHandle> {
        self.shared.active_connection()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => admit(&shared, stream, peer, &shutdown, &mut tasks),
                Err(e) => error!("accept failed: {}", e),
            },
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.close_all();
    while tasks.join_next().await.is_some() {}
}

fn admit(
    shared: &Arc<Shared>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: &watch::Receiver<bool>,
    tasks: &mut JoinSet<()>,
) {
    if let Some(handler) = &shared.handlers.connection_request {
        if !handler(peer) {
            info!(%peer, "connection rejected by request handler");
            return;
        }
    }
    match shared.register(peer) {
        Some((handle, commands)) => {
            debug!(%peer, "connection accepted");
            stream.set_nodelay(true).ok();
            tasks.spawn(connection::serve(
                shared.clone(),
                handle,
                commands,
                stream,
                shutdown.clone(),
            ));
        }
        None => warn!(%peer, "connection limit reached, closing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config() {
        let config = ServerConfig::new()
            .bind_address("127.0.0.1")
            .port(2405)
            .max_queue_size(50)
            .max_open_connections(2);

        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 2405);
        assert_eq!(config.max_queue_size, 50);
        assert_eq!(config.max_open_connections, 2);
        assert!(config.validate().is_ok());

        let defaults = ServerConfig::default();
        assert_eq!(defaults.bind_address, "0.0.0.0");
        assert_eq!(defaults.port, DEFAULT_PORT);
        assert_eq!(defaults.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
        assert_eq!(defaults.max_open_connections, DEFAULT_MAX_OPEN_CONNECTIONS);
    }

    #[test]
    fn test_config_validation() {
        assert!(ServerConfig::new().max_open_connections(0).validate().is_err());
        assert!(ServerConfig::new().max_queue_size(0).validate().is_err());
        assert!(ServerConfig::new()
            .parameters(ConnectionParameters::default().size_of_ioa(4))
            .validate()
            .is_err());
    }

    #[test]
    fn test_connection_limit() {
        let shared = Shared::new(&ServerConfig::new().max_open_connections(1));
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let (first, _rx) = shared.register(peer).unwrap();
        assert!(shared.register(peer).is_none());
        assert_eq!(shared.open_connections(), 1);

        shared.unregister(&first);
        assert!(shared.register(peer).is_some());
    }

    #[test]
    fn test_single_active_connection() {
        let shared = Shared::new(&ServerConfig::new());
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let (a, _rx_a) = shared.register(peer).unwrap();
        let (b, _rx_b) = shared.register(peer).unwrap();

        shared.activate(&a);
        assert!(a.is_active());
        assert_eq!(shared.active_connection().map(|h| h.id()), Some(a.id()));

        shared.activate(&b);
        assert!(!a.is_active());
        assert!(b.is_active());
        assert_eq!(shared.active_connection().map(|h| h.id()), Some(b.id()));
    }

    #[test]
    fn test_concurrent_activation_leaves_one_active() {
        let shared = Shared::new(&ServerConfig::new());
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let handles: Vec<_> = (0..4).map(|_| shared.register(peer).unwrap()).collect();

        for _ in 0..200 {
            let barrier = std::sync::Barrier::new(handles.len());
            std::thread::scope(|scope| {
                for (handle, _) in &handles {
                    let (shared, barrier) = (&shared, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        shared.activate(handle);
                    });
                }
            });
            let active = handles.iter().filter(|(h, _)| h.is_active()).count();
            assert_eq!(active, 1);
            for (handle, _) in &handles {
                handle.set_active(false);
            }
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut server = Server::new(ServerConfig::new().bind_address("127.0.0.1").port(0));
        server.start().await.unwrap();
        assert!(server.is_running());
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.start().await.is_err());

        server.stop().await;
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_enqueue_without_active_connection() {
        let server = Server::new(ServerConfig::new().max_queue_size(2));
        let params = ConnectionParameters::default();
        for _ in 0..3 {
            server.enqueue_asdu(Asdu::new(&params, crate::types::Cot::Spontaneous, 1));
        }
        assert_eq!(server.queued_asdus(), 2);
        assert!(server.active_connection().is_none());
    }
}
