//! One master connection of the server.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use super::Shared;
use crate::codec::Apdu;
use crate::error::{Iec104Error, Result};
use crate::session::{ConnectionStatistics, Inbound, Session, Statistics};
use crate::transport::secure_accept;
use crate::types::{Asdu, Cot, InformationElement, TypeId, UFunction};

/// Lifecycle events of a server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerConnectionEvent {
    /// Master connected
    Opened,
    /// Connection closed
    Closed,
    /// STARTDT received, this connection now gets the data
    Activated,
    /// STOPDT received or another connection was activated
    Deactivated,
}

pub(crate) enum Command {
    Send(Asdu),
    Wake,
    Close,
}

pub(crate) type CommandReceiver = mpsc::UnboundedReceiver<Command>;

/// Handle to one master connection, passed to server handlers.
///
/// Sending only queues the ASDU; the connection task transmits it once the
/// k window allows.
#[derive(Clone)]
pub struct ServerConnectionHandle {
    id: u64,
    peer: SocketAddr,
    active: Arc<AtomicBool>,
    statistics: Arc<Statistics>,
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for ServerConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("active", &self.is_active())
            .finish()
    }
}

impl ServerConnectionHandle {
    pub(crate) fn new(id: u64, peer: SocketAddr) -> (Self, CommandReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            peer,
            active: Arc::new(AtomicBool::new(false)),
            statistics: Arc::default(),
            commands: tx,
        };
        (handle, rx)
    }

    /// Server-unique connection id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address of the master.
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether data transfer is started on this connection.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Set the active flag, returning the previous value.
    pub(crate) fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::SeqCst)
    }

    /// Traffic counters of this connection.
    pub fn statistics(&self) -> ConnectionStatistics {
        self.statistics.snapshot()
    }

    /// Send an ASDU. Fails unless the connection is active.
    pub fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        if !self.is_active() {
            return Err(Iec104Error::Connection(format!(
                "data transfer not started on {}",
                self.peer
            )));
        }
        self.commands
            .send(Command::Send(asdu))
            .map_err(|_| Iec104Error::NotConnected)
    }

    /// Confirm a received command. Deactivations are answered with
    /// DEACT_CON, everything else with ACT_CON.
    pub fn send_act_con(&self, asdu: &Asdu, negative: bool) -> Result<()> {
        let cot = match asdu.cot() {
            Cot::Deactivation => Cot::DeactivationConfirm,
            _ => Cot::ActivationConfirm,
        };
        let mut reply = asdu.clone().with_cot(cot);
        reply.set_negative(negative);
        self.send_asdu(reply)
    }

    /// Terminate a received command with ACT_TERM.
    pub fn send_act_term(&self, asdu: &Asdu) -> Result<()> {
        let mut reply = asdu.clone().with_cot(Cot::ActivationTermination);
        reply.set_negative(false);
        self.send_asdu(reply)
    }

    /// Close the connection.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub(crate) fn wake(&self) {
        let _ = self.commands.send(Command::Wake);
    }
}

/// Serve an accepted TCP stream until it closes or the server shuts down.
pub(crate) async fn serve(
    shared: Arc<Shared>,
    handle: ServerConnectionHandle,
    commands: CommandReceiver,
    stream: TcpStream,
    shutdown: watch::Receiver<bool>,
) {
    let peer = handle.peer_addr();
    let secured = timeout(
        shared.parameters.t0,
        secure_accept(shared.security.as_deref(), stream),
    )
    .await;

    match secured {
        Ok(Ok(stream)) => run_connection(shared, handle, commands, stream, shutdown).await,
        Ok(Err(e)) => {
            warn!(%peer, "secure handshake failed: {}", e);
            shared.unregister(&handle);
        }
        Err(_) => {
            warn!(%peer, "secure handshake timed out");
            shared.unregister(&handle);
        }
    }
}

pub(crate) async fn run_connection<S>(
    shared: Arc<Shared>,
    handle: ServerConnectionHandle,
    commands: CommandReceiver,
    stream: S,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let session = Session::new(
        stream,
        shared.parameters,
        shared.handlers.raw.clone(),
        handle.statistics.clone(),
        handle.peer_addr().to_string(),
    );
    let mut task = ServerTask {
        session,
        handle: handle.clone(),
        commands,
        shutdown,
        shared: shared.clone(),
        outbox: VecDeque::new(),
    };

    info!(peer = %handle.peer_addr(), "connection opened");
    shared.emit(&handle, ServerConnectionEvent::Opened);

    match task.run().await {
        Ok(()) => info!(peer = %handle.peer_addr(), "connection closed"),
        Err(e) => warn!(peer = %handle.peer_addr(), "connection failed: {}", e),
    }

    handle.set_active(false);
    shared.unregister(&handle);
    shared.emit(&handle, ServerConnectionEvent::Closed);
}

struct ServerTask<S> {
    session: Session<S>,
    handle: ServerConnectionHandle,
    commands: CommandReceiver,
    shutdown: watch::Receiver<bool>,
    shared: Arc<Shared>,
    outbox: VecDeque<Asdu>,
}

impl<S> ServerTask<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(&mut self) -> Result<()> {
        loop {
            self.flush().await?;

            let deadline = self.session.next_deadline();
            tokio::select! {
                frame = self.session.next_frame() => match frame {
                    Some(Ok(apdu)) => self.on_frame(apdu).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(asdu)) => self.outbox.push_back(asdu),
                    Some(Command::Wake) => {}
                    Some(Command::Close) | None => return Ok(()),
                },
                _ = self.shutdown.changed() => return Ok(()),
                _ = sleep_until(deadline) => self.session.on_timer(Instant::now()).await?,
            }
        }
    }

    /// Send responses first, then queued data, while the k window allows.
    async fn flush(&mut self) -> Result<()> {
        if !self.handle.is_active() {
            if !self.outbox.is_empty() {
                debug!(peer = %self.session.peer(), "discarding {} responses, connection inactive", self.outbox.len());
                self.outbox.clear();
            }
            return Ok(());
        }

        while self.session.link().can_send() {
            let next = match self.outbox.pop_front() {
                Some(asdu) => asdu,
                None => match self.shared.dequeue() {
                    Some(asdu) => asdu,
                    None => break,
                },
            };
            debug!(peer = %self.session.peer(), "send {}", next);
            self.session.send_i(next.to_bytes()).await?;
        }
        Ok(())
    }

    async fn on_frame(&mut self, apdu: Apdu) -> Result<()> {
        match self.session.receive(apdu).await? {
            Inbound::Asdu(bytes) => {
                if !self.handle.is_active() {
                    debug!(peer = %self.session.peer(), "ignoring I-frame, data transfer not started");
                    return Ok(());
                }
                match Asdu::parse(&self.shared.parameters, &bytes) {
                    Ok(asdu) => {
                        debug!(peer = %self.session.peer(), "received {}", asdu);
                        self.dispatch(asdu);
                    }
                    Err(e) => warn!(peer = %self.session.peer(), "dropping malformed ASDU: {}", e),
                }
            }
            Inbound::Control(UFunction::StartDtAct) => {
                if !self.handle.is_active() {
                    self.shared.activate(&self.handle);
                    info!(peer = %self.session.peer(), "data transfer started");
                    self.shared.emit(&self.handle, ServerConnectionEvent::Activated);
                }
                self.session.send_u(UFunction::StartDtCon).await?;
            }
            Inbound::Control(UFunction::StopDtAct) => {
                if self.handle.set_active(false) {
                    info!(peer = %self.session.peer(), "data transfer stopped");
                    self.shared.emit(&self.handle, ServerConnectionEvent::Deactivated);
                }
                self.session.send_u(UFunction::StopDtCon).await?;
            }
            Inbound::Control(function) => {
                debug!(peer = %self.session.peer(), "ignoring {:?} from master", function);
            }
            Inbound::Handled => {}
        }
        Ok(())
    }

    /// Route a command to its handler. Known commands with an unexpected
    /// cause are answered with UNKNOWN_COT, unhandled ASDUs with
    /// UNKNOWN_TYPE_ID.
    fn dispatch(&mut self, asdu: Asdu) {
        let shared = self.shared.clone();
        let handlers = &shared.handlers;
        let handle = self.handle.clone();
        let cot = asdu.cot();
        let activation = matches!(cot, Cot::Activation | Cot::Deactivation);

        let cause_accepted = match asdu.type_id() {
            Some(TypeId::InterrogationCommand | TypeId::CounterInterrogation) => Some(activation),
            Some(TypeId::ReadCommand) => Some(cot == Cot::Request),
            Some(TypeId::ClockSync | TypeId::TestCommand | TypeId::ResetProcess) => {
                Some(cot == Cot::Activation)
            }
            Some(TypeId::DelayAcquisition) => {
                Some(matches!(cot, Cot::Activation | Cot::Spontaneous))
            }
            _ => None,
        };
        if cause_accepted == Some(false) {
            return self.reject(asdu, Cot::UnknownCot);
        }

        let element = asdu.element(0).ok().map(|io| (io.address, io.element));
        let handled = match element {
            Some((_, InformationElement::Interrogation(qoi))) => handlers
                .interrogation
                .as_ref()
                .is_some_and(|h| h(&handle, &asdu, qoi)),
            Some((_, InformationElement::CounterInterrogation(qcc))) => handlers
                .counter_interrogation
                .as_ref()
                .is_some_and(|h| h(&handle, &asdu, qcc)),
            Some((ioa, InformationElement::Read)) => {
                handlers.read.as_ref().is_some_and(|h| h(&handle, &asdu, ioa))
            }
            Some((_, InformationElement::ClockSync(time))) => handlers
                .clock_sync
                .as_ref()
                .is_some_and(|h| h(&handle, &asdu, time)),
            Some((_, InformationElement::Test(_))) => {
                self.outbox.push_back(asdu.with_cot(Cot::ActivationConfirm));
                return;
            }
            Some((_, InformationElement::ResetProcess(qrp))) => handlers
                .reset_process
                .as_ref()
                .is_some_and(|h| h(&handle, &asdu, qrp)),
            Some((_, InformationElement::DelayAcquisition(delay))) => handlers
                .delay_acquisition
                .as_ref()
                .is_some_and(|h| h(&handle, &asdu, delay)),
            _ => false,
        };

        let handled = handled || handlers.asdu.as_ref().is_some_and(|h| h(&handle, &asdu));
        if !handled {
            self.reject(asdu, Cot::UnknownTypeId);
        }
    }

    fn reject(&mut self, asdu: Asdu, cot: Cot) {
        debug!(peer = %self.session.peer(), "rejecting {} with {}", asdu, cot);
        let mut reply = asdu.with_cot(cot);
        reply.set_negative(true);
        self.outbox.push_back(reply);
    }
}
