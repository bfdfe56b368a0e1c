//! IEC 60870-5-104 master (controlling station) connection.
//!
//! A [`Connection`] dials an outstation, optionally starts data transfer and
//! runs the link in a background task. Received ASDUs and link events are
//! delivered to callbacks from that task; commands are queued to it.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voltage_iec60870::{Asdu, Connection, ConnectionConfig, Cot, QOI_STATION};
//!
//! let config = ConnectionConfig::new("192.168.1.100")
//!     .asdu_handler(Arc::new(|asdu: &Asdu| {
//!         println!("received {}", asdu);
//!         true
//!     }));
//! let mut connection = Connection::new(config);
//! connection.connect().await?;
//! connection
//!     .send_interrogation_command(Cot::Activation, 1, QOI_STATION)
//!     .await?;
//! ```

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::codec::{Apdu, RawMessageHandler};
use crate::error::{Iec104Error, Result};
use crate::parameters::{ConnectionParameters, DEFAULT_PORT};
use crate::session::{ConnectionStatistics, Inbound, Session, Statistics};
use crate::transport::{secure_connect, TransportSecurity};
use crate::types::{
    Asdu, Cot, Cp16Time2a, Cp56Time2a, InformationElement, InformationObject, UFunction,
    TEST_PATTERN,
};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected yet
    Disconnected,
    /// TCP (and security) handshake in progress
    Connecting,
    /// Connected, data transfer stopped
    ConnectedInactive,
    /// Connected, data transfer confirmed by STARTDT con
    ConnectedActive,
    /// Link closed
    Closed,
}

/// Link events reported to the [`ConnectionEventHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection established
    Opened,
    /// Connection closed, locally or by failure
    Closed,
    /// Outstation confirmed STARTDT
    StartDtConReceived,
    /// Outstation confirmed STOPDT
    StopDtConReceived,
}

/// Callback for received ASDUs. Returning false closes the connection.
pub type AsduReceivedHandler = Arc<dyn Fn(&Asdu) -> bool + Send + Sync>;

/// Callback for link events.
pub type ConnectionEventHandler = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Master connection configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Outstation host name or address
    pub host: String,
    /// Outstation port
    pub port: u16,
    /// Protocol parameters
    pub parameters: ConnectionParameters,
    /// Send STARTDT act right after connecting
    pub autostart: bool,
    /// Optional security layer wrapping the TCP stream
    pub security: Option<Arc<dyn TransportSecurity>>,
    asdu_handler: Option<AsduReceivedHandler>,
    event_handler: Option<ConnectionEventHandler>,
    raw_handler: Option<RawMessageHandler>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("parameters", &self.parameters)
            .field("autostart", &self.autostart)
            .field("security", &self.security.is_some())
            .finish_non_exhaustive()
    }
}

impl ConnectionConfig {
    /// Create a configuration for `host` on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            parameters: ConnectionParameters::default(),
            autostart: true,
            security: None,
            asdu_handler: None,
            event_handler: None,
            raw_handler: None,
        }
    }

    /// Set the outstation port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set protocol parameters.
    pub fn parameters(mut self, parameters: ConnectionParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Enable or disable sending STARTDT act on connect.
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Secure the connection with `security`.
    pub fn security(mut self, security: Arc<dyn TransportSecurity>) -> Self {
        self.security = Some(security);
        self
    }

    /// Set the received ASDU callback.
    pub fn asdu_handler(mut self, handler: AsduReceivedHandler) -> Self {
        self.asdu_handler = Some(handler);
        self
    }

    /// Set the link event callback.
    pub fn event_handler(mut self, handler: ConnectionEventHandler) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the raw frame observer.
    pub fn raw_handler(mut self, handler: RawMessageHandler) -> Self {
        self.raw_handler = Some(handler);
        self
    }
}

enum Command {
    SendAsdu(Asdu, oneshot::Sender<Result<()>>),
    SendU(UFunction, oneshot::Sender<Result<()>>),
    Close,
}

/// IEC 60870-5-104 master connection.
pub struct Connection {
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    statistics: Arc<Statistics>,
    commands: Option<mpsc::Sender<Command>>,
}

impl Connection {
    /// Create an unconnected master connection.
    pub fn new(config: ConnectionConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state_tx,
            state_rx,
            statistics: Arc::default(),
            commands: None,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Protocol parameters of this connection.
    pub fn parameters(&self) -> &ConnectionParameters {
        &self.config.parameters
    }

    /// Traffic counters of the current (or last) link.
    pub fn statistics(&self) -> ConnectionStatistics {
        self.statistics.snapshot()
    }

    /// Connect to the outstation within t0 and start the link task.
    ///
    /// A closed connection can be connected again; sequence numbers and
    /// statistics start from zero.
    pub async fn connect(&mut self) -> Result<()> {
        self.begin_connect()?;
        let address = format!("{}:{}", self.config.host, self.config.port);
        let t0 = self.config.parameters.t0;

        let host = self.config.host.clone();
        let security = self.config.security.clone();
        let target = address.clone();
        let connected = async move {
            let stream = TcpStream::connect(&target).await?;
            // Disable Nagle's algorithm for low latency
            stream.set_nodelay(true).ok();
            secure_connect(security.as_deref(), stream, &host).await
        };

        let result = timeout(t0, connected).await;
        match result {
            Ok(Ok(stream)) => {
                info!("connected to {}", address);
                self.start(stream, address);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("connecting to {} failed: {}", address, e);
                self.state_tx.send_replace(ConnectionState::Disconnected);
                Err(Iec104Error::Io(e))
            }
            Err(_) => {
                warn!("connecting to {} timed out", address);
                self.state_tx.send_replace(ConnectionState::Disconnected);
                Err(Iec104Error::ConnectionTimeout)
            }
        }
    }

    /// Run the link over an already established byte stream.
    pub fn connect_stream<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.begin_connect()?;
        self.start(stream, "stream".to_string());
        Ok(())
    }

    fn begin_connect(&mut self) -> Result<()> {
        match self.state() {
            ConnectionState::Disconnected | ConnectionState::Closed => {}
            _ => return Err(Iec104Error::Connection("already connected".to_string())),
        }
        self.config.parameters.validate()?;
        self.state_tx.send_replace(ConnectionState::Connecting);
        Ok(())
    }

    fn start<S>(&mut self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.statistics = Arc::default();
        let (tx, rx) = mpsc::channel(100);
        let session = Session::new(
            stream,
            self.config.parameters,
            self.config.raw_handler.clone(),
            self.statistics.clone(),
            peer,
        );
        let task = MasterTask {
            session,
            commands: rx,
            state: self.state_tx.clone(),
            parameters: self.config.parameters,
            autostart: self.config.autostart,
            asdu_handler: self.config.asdu_handler.clone(),
            event_handler: self.config.event_handler.clone(),
        };
        self.state_tx.send_replace(ConnectionState::ConnectedInactive);
        self.commands = Some(tx);
        tokio::spawn(task.run());
    }

    /// Close the connection and wait for the link task to finish.
    pub async fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Close).await;
            let mut state = self.state_rx.clone();
            let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
        }
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| Iec104Error::ChannelClosed)
    }

    async fn request(&self, build: impl FnOnce(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(Iec104Error::NotConnected)?;
        let (tx, rx) = oneshot::channel();
        commands
            .send(build(tx))
            .await
            .map_err(|_| Iec104Error::NotConnected)?;
        rx.await.map_err(|_| Iec104Error::NotConnected)?
    }

    /// Send STARTDT act. The confirmation is reported as an event.
    pub async fn send_start_dt(&self) -> Result<()> {
        self.request(|reply| Command::SendU(UFunction::StartDtAct, reply))
            .await
    }

    /// Send STOPDT act. The confirmation is reported as an event.
    pub async fn send_stop_dt(&self) -> Result<()> {
        self.request(|reply| Command::SendU(UFunction::StopDtAct, reply))
            .await
    }

    /// Send an ASDU.
    ///
    /// Fails with [`Iec104Error::TooManyUnconfirmed`] while k I-frames
    /// await acknowledgement.
    pub async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        self.request(|reply| Command::SendAsdu(asdu, reply)).await
    }

    fn single_object(&self, cot: Cot, ca: u16, io: InformationObject) -> Result<Asdu> {
        let mut asdu = Asdu::new(&self.config.parameters, cot, ca);
        if !asdu.add_information_object(&io) {
            return Err(Iec104Error::range(format!(
                "information object {} does not fit into an ASDU",
                io.address
            )));
        }
        Ok(asdu)
    }

    async fn send_object(&self, cot: Cot, ca: u16, address: u32, element: InformationElement) -> Result<()> {
        let asdu = self.single_object(cot, ca, InformationObject::new(address, element))?;
        self.send_asdu(asdu).await
    }

    /// Send an interrogation command (C_IC_NA_1).
    pub async fn send_interrogation_command(&self, cot: Cot, ca: u16, qoi: u8) -> Result<()> {
        self.send_object(cot, ca, 0, InformationElement::Interrogation(qoi))
            .await
    }

    /// Send a counter interrogation command (C_CI_NA_1).
    pub async fn send_counter_interrogation_command(&self, cot: Cot, ca: u16, qcc: u8) -> Result<()> {
        self.send_object(cot, ca, 0, InformationElement::CounterInterrogation(qcc))
            .await
    }

    /// Send a read command (C_RD_NA_1) for one information object.
    pub async fn send_read_command(&self, ca: u16, ioa: u32) -> Result<()> {
        self.send_object(Cot::Request, ca, ioa, InformationElement::Read)
            .await
    }

    /// Send a clock synchronization command (C_CS_NA_1).
    pub async fn send_clock_sync_command(&self, ca: u16, time: Cp56Time2a) -> Result<()> {
        self.send_object(Cot::Activation, ca, 0, InformationElement::ClockSync(time))
            .await
    }

    /// Send a test command (C_TS_NA_1) with the fixed test pattern.
    pub async fn send_test_command(&self, ca: u16) -> Result<()> {
        self.send_object(Cot::Activation, ca, 0, InformationElement::Test(TEST_PATTERN))
            .await
    }

    /// Send a test command with time tag (C_TS_TA_1).
    pub async fn send_test_command_with_time(&self, ca: u16, tsc: u16, time: Cp56Time2a) -> Result<()> {
        self.send_object(
            Cot::Activation,
            ca,
            0,
            InformationElement::TestWithTime(tsc, time),
        )
        .await
    }

    /// Send a reset process command (C_RP_NA_1).
    pub async fn send_reset_process_command(&self, cot: Cot, ca: u16, qrp: u8) -> Result<()> {
        self.send_object(cot, ca, 0, InformationElement::ResetProcess(qrp))
            .await
    }

    /// Send a delay acquisition command (C_CD_NA_1).
    pub async fn send_delay_acquisition_command(&self, cot: Cot, ca: u16, delay: Cp16Time2a) -> Result<()> {
        self.send_object(cot, ca, 0, InformationElement::DelayAcquisition(delay))
            .await
    }

    /// Send a process or parameter command carried by `io`.
    pub async fn send_control_command(&self, cot: Cot, ca: u16, io: InformationObject) -> Result<()> {
        let asdu = self.single_object(cot, ca, io)?;
        self.send_asdu(asdu).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

struct MasterTask<S> {
    session: Session<S>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    parameters: ConnectionParameters,
    autostart: bool,
    asdu_handler: Option<AsduReceivedHandler>,
    event_handler: Option<ConnectionEventHandler>,
}

impl<S> MasterTask<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn emit(&self, event: ConnectionEvent) {
        if let Some(handler) = &self.event_handler {
            handler(event);
        }
    }

    async fn run(mut self) {
        self.emit(ConnectionEvent::Opened);

        let result = self.run_link().await;
        match &result {
            Ok(()) => debug!(peer = %self.session.peer(), "connection closed"),
            Err(e) => warn!(peer = %self.session.peer(), "connection failed: {}", e),
        }

        self.state.send_replace(ConnectionState::Closed);
        self.emit(ConnectionEvent::Closed);
    }

    async fn run_link(&mut self) -> Result<()> {
        if self.autostart {
            self.session.send_u(UFunction::StartDtAct).await?;
        }

        loop {
            let deadline = self.session.next_deadline();
            tokio::select! {
                frame = self.session.next_frame() => match frame {
                    Some(Ok(apdu)) => {
                        if !self.on_frame(apdu).await? {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(Iec104Error::Connection("closed by peer".to_string())),
                },
                command = self.commands.recv() => match command {
                    Some(Command::SendAsdu(asdu, reply)) => {
                        match self.session.send_i(asdu.to_bytes()).await {
                            Err(Iec104Error::TooManyUnconfirmed(k)) => {
                                let _ = reply.send(Err(Iec104Error::TooManyUnconfirmed(k)));
                            }
                            Err(e) => {
                                let _ = reply.send(Err(Iec104Error::Connection(e.to_string())));
                                return Err(e);
                            }
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                            }
                        }
                    }
                    Some(Command::SendU(function, reply)) => {
                        if let Err(e) = self.session.send_u(function).await {
                            let _ = reply.send(Err(Iec104Error::Connection(e.to_string())));
                            return Err(e);
                        }
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Close) | None => return Ok(()),
                },
                _ = sleep_until(deadline) => {
                    self.session.on_timer(tokio::time::Instant::now()).await?;
                }
            }
        }
    }

    /// Handle one received frame. Returns false when the application asked
    /// to stop receiving.
    async fn on_frame(&mut self, apdu: Apdu) -> Result<bool> {
        match self.session.receive(apdu).await? {
            Inbound::Asdu(bytes) => match Asdu::parse(&self.parameters, &bytes) {
                Ok(asdu) => {
                    debug!(peer = %self.session.peer(), "received {}", asdu);
                    if let Some(handler) = &self.asdu_handler {
                        if !handler(&asdu) {
                            debug!(peer = %self.session.peer(), "ASDU handler requested close");
                            return Ok(false);
                        }
                    }
                }
                Err(e) => warn!(peer = %self.session.peer(), "dropping malformed ASDU: {}", e),
            },
            Inbound::Control(UFunction::StartDtCon) => {
                self.state.send_replace(ConnectionState::ConnectedActive);
                self.emit(ConnectionEvent::StartDtConReceived);
            }
            Inbound::Control(UFunction::StopDtCon) => {
                self.state.send_replace(ConnectionState::ConnectedInactive);
                self.emit(ConnectionEvent::StopDtConReceived);
            }
            Inbound::Control(function) => {
                warn!(peer = %self.session.peer(), "ignoring {:?} from outstation", function);
            }
            Inbound::Handled => {}
        }
        Ok(true)
    }
}
