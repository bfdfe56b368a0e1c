//! Link layer shared by master and server connections.
//!
//! A `Session` owns the framed stream of one connection together with its
//! sequence counters and timers. It answers link tests, tracks
//! acknowledgements, and hands I-frame payloads and STARTDT/STOPDT traffic
//! up to the role-specific connection task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::codec::{Apdu, Iec104Codec, RawMessageHandler};
use crate::error::{Iec104Error, Result};
use crate::link::LinkState;
use crate::parameters::ConnectionParameters;
use crate::types::{Apci, UFunction};

/// Snapshot of connection traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatistics {
    /// Frames sent (I, S and U)
    pub sent_messages: u64,
    /// Frames received (I, S and U)
    pub received_messages: u64,
    /// TESTFR act frames received
    pub test_act_received: u64,
    /// TESTFR con frames received
    pub test_con_received: u64,
}

/// Traffic counters shared between a connection task and its handle.
#[derive(Debug, Default)]
pub(crate) struct Statistics {
    sent_messages: AtomicU64,
    received_messages: AtomicU64,
    test_act_received: AtomicU64,
    test_con_received: AtomicU64,
}

impl Statistics {
    pub(crate) fn snapshot(&self) -> ConnectionStatistics {
        ConnectionStatistics {
            sent_messages: self.sent_messages.load(Ordering::Relaxed),
            received_messages: self.received_messages.load(Ordering::Relaxed),
            test_act_received: self.test_act_received.load(Ordering::Relaxed),
            test_con_received: self.test_con_received.load(Ordering::Relaxed),
        }
    }
}

/// What a received frame means to the connection role.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Encoded ASDU of an in-sequence I-frame
    Asdu(Bytes),
    /// STARTDT/STOPDT activation or confirmation
    Control(UFunction),
    /// Fully handled by the link layer
    Handled,
}

pub(crate) struct Session<S> {
    framed: Framed<S, Iec104Codec>,
    params: ConnectionParameters,
    link: LinkState,
    t3_reference: Instant,
    pending: Vec<(UFunction, Instant)>,
    stats: Arc<Statistics>,
    peer: String,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        stream: S,
        params: ConnectionParameters,
        raw_handler: Option<RawMessageHandler>,
        stats: Arc<Statistics>,
        peer: String,
    ) -> Self {
        Self {
            framed: Framed::new(stream, Iec104Codec::with_raw_handler(raw_handler)),
            link: LinkState::new(&params),
            params,
            t3_reference: Instant::now(),
            pending: Vec::new(),
            stats,
            peer,
        }
    }

    #[inline]
    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    #[inline]
    pub(crate) fn link(&self) -> &LinkState {
        &self.link
    }

    /// Next frame from the peer, `None` once the peer closed the stream.
    pub(crate) async fn next_frame(&mut self) -> Option<Result<Apdu>> {
        self.framed.next().await
    }

    async fn write(&mut self, apdu: Apdu) -> Result<()> {
        trace!(peer = %self.peer, "send {}", apdu);
        self.framed.send(apdu).await?;
        self.stats.sent_messages.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Send a U-frame. Activations are confirmed within t1 or the link fails.
    pub(crate) async fn send_u(&mut self, function: UFunction) -> Result<()> {
        self.write(Apdu::u_frame(function)).await?;
        if function.confirmation().is_some() {
            self.pending
                .push((function, Instant::now() + self.params.t1));
        }
        Ok(())
    }

    /// Send an encoded ASDU in the next I-frame.
    ///
    /// Fails with `TooManyUnconfirmed` without touching the link when k
    /// I-frames are awaiting acknowledgement.
    pub(crate) async fn send_i(&mut self, asdu: Bytes) -> Result<()> {
        if !self.link.can_send() {
            return Err(Iec104Error::TooManyUnconfirmed(self.params.k));
        }
        let apci = self.link.prepare_i_frame(Instant::now());
        self.write(Apdu {
            apci,
            asdu: Some(asdu),
        })
        .await
    }

    async fn send_s(&mut self) -> Result<()> {
        let apci: Apci = self.link.prepare_s_frame();
        self.write(Apdu { apci, asdu: None }).await
    }

    /// Earliest instant one of the link timers needs attention.
    pub(crate) fn next_deadline(&self) -> Instant {
        let t3 = self.t3_reference + self.params.t3;
        [
            self.link.t1_deadline(),
            self.link.ack_deadline(),
            self.pending.iter().map(|(_, deadline)| *deadline).min(),
        ]
        .into_iter()
        .flatten()
        .fold(t3, Instant::min)
    }

    /// Handle expired timers: t1 fails the link, t2 sends an S-frame and
    /// t3 sends a link test.
    pub(crate) async fn on_timer(&mut self, now: Instant) -> Result<()> {
        if self.link.t1_expired(now) {
            warn!(peer = %self.peer, "t1 expired waiting for I-frame acknowledgement");
            return Err(Iec104Error::T1Timeout);
        }
        if let Some((function, _)) = self.pending.iter().find(|(_, deadline)| now >= *deadline) {
            warn!(peer = %self.peer, "t1 expired waiting for {:?} confirmation", function);
            return Err(Iec104Error::T1Timeout);
        }
        if self.link.ack_required(now) {
            self.send_s().await?;
        }
        if now >= self.t3_reference + self.params.t3 {
            self.t3_reference = now;
            if !self.is_pending(UFunction::TestFrAct) {
                debug!(peer = %self.peer, "t3 idle, sending TESTFR act");
                self.send_u(UFunction::TestFrAct).await?;
            }
        }
        Ok(())
    }

    fn is_pending(&self, function: UFunction) -> bool {
        self.pending.iter().any(|(f, _)| *f == function)
    }

    /// Run the link layer part of a received frame.
    pub(crate) async fn receive(&mut self, apdu: Apdu) -> Result<Inbound> {
        let now = Instant::now();
        self.t3_reference = now;
        self.stats.received_messages.fetch_add(1, Ordering::Relaxed);
        trace!(peer = %self.peer, "recv {}", apdu);

        match apdu.apci {
            Apci::IFrame { send_seq, recv_seq } => {
                self.link.on_i_frame(send_seq, recv_seq, now)?;
                if self.link.ack_required(now) {
                    self.send_s().await?;
                }
                Ok(Inbound::Asdu(apdu.asdu.unwrap_or_default()))
            }
            Apci::SFrame { recv_seq } => {
                self.link.acknowledge(recv_seq)?;
                Ok(Inbound::Handled)
            }
            Apci::UFrame { function } => match function {
                UFunction::TestFrAct => {
                    self.stats.test_act_received.fetch_add(1, Ordering::Relaxed);
                    self.send_u(UFunction::TestFrCon).await?;
                    Ok(Inbound::Handled)
                }
                UFunction::TestFrCon => {
                    self.stats.test_con_received.fetch_add(1, Ordering::Relaxed);
                    self.confirm(function);
                    Ok(Inbound::Handled)
                }
                UFunction::StartDtCon | UFunction::StopDtCon => {
                    self.confirm(function);
                    Ok(Inbound::Control(function))
                }
                UFunction::StartDtAct | UFunction::StopDtAct => Ok(Inbound::Control(function)),
                UFunction::Unknown(byte) => {
                    warn!(peer = %self.peer, "ignoring unknown U-frame 0x{:02X}", byte);
                    Ok(Inbound::Handled)
                }
            },
        }
    }

    fn confirm(&mut self, confirmation: UFunction) {
        let before = self.pending.len();
        self.pending
            .retain(|(function, _)| function.confirmation() != Some(confirmation));
        if self.pending.len() == before {
            debug!(peer = %self.peer, "unsolicited {:?}", confirmation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::io::Builder;

    fn session(mock: tokio_test::io::Mock, params: ConnectionParameters) -> Session<tokio_test::io::Mock> {
        Session::new(mock, params, None, Arc::default(), "mock".into())
    }

    #[tokio::test]
    async fn test_answers_test_frame() {
        let mock = Builder::new()
            .read(&[0x68, 0x04, 0x43, 0x00, 0x00, 0x00])
            .write(&[0x68, 0x04, 0x83, 0x00, 0x00, 0x00])
            .build();
        let mut session = session(mock, ConnectionParameters::default());

        let apdu = session.next_frame().await.unwrap().unwrap();
        assert!(matches!(session.receive(apdu).await.unwrap(), Inbound::Handled));
        assert_eq!(session.stats.snapshot().test_act_received, 1);
        assert_eq!(session.stats.snapshot().sent_messages, 1);
    }

    #[tokio::test]
    async fn test_unknown_u_frame_ignored() {
        let mock = Builder::new()
            .read(&[0x68, 0x04, 0x03, 0x00, 0x00, 0x00])
            .read(&[0x68, 0x04, 0x43, 0x00, 0x00, 0x00])
            .write(&[0x68, 0x04, 0x83, 0x00, 0x00, 0x00])
            .build();
        let mut session = session(mock, ConnectionParameters::default());

        for _ in 0..2 {
            let apdu = session.next_frame().await.unwrap().unwrap();
            assert!(matches!(session.receive(apdu).await.unwrap(), Inbound::Handled));
        }
        assert_eq!(session.stats.snapshot().received_messages, 2);
        assert_eq!(session.stats.snapshot().test_act_received, 1);
    }

    #[tokio::test]
    async fn test_acknowledges_after_w_frames() {
        let asdu = [100, 0x01, 0x07, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 20];
        let frame = |seq: u8| {
            let mut f = vec![0x68, 14, seq << 1, 0x00, 0x00, 0x00];
            f.extend_from_slice(&asdu);
            f
        };
        let mock = Builder::new()
            .read(&frame(0))
            .read(&frame(1))
            // w = 1: the second frame exceeds the window, S-frame N(R)=2
            .write(&[0x68, 0x04, 0x01, 0x00, 0x04, 0x00])
            .build();
        let mut session = session(mock, ConnectionParameters::default().w(1));

        for _ in 0..2 {
            let apdu = session.next_frame().await.unwrap().unwrap();
            assert!(matches!(session.receive(apdu).await.unwrap(), Inbound::Asdu(_)));
        }
        assert_eq!(session.link().receive_count(), 2);
        assert_eq!(session.link().unconfirmed_received(), 0);
    }

    #[tokio::test]
    async fn test_sequence_error_is_fatal() {
        let mut frame = vec![0x68, 14, 0x02, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[100, 0x01, 0x07, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 20]);
        let mock = Builder::new().read(&frame).build();
        let mut session = session(mock, ConnectionParameters::default());

        let apdu = session.next_frame().await.unwrap().unwrap();
        assert!(matches!(
            session.receive(apdu).await,
            Err(Iec104Error::SequenceMismatch {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_k_window_blocks_sending() {
        let mock = Builder::new()
            .write(&[0x68, 0x05, 0x00, 0x00, 0x00, 0x00, 0xAA])
            .build();
        let mut session = session(mock, ConnectionParameters::default().k(1));

        session.send_i(Bytes::from_static(&[0xAA])).await.unwrap();
        assert!(matches!(
            session.send_i(Bytes::from_static(&[0xBB])).await,
            Err(Iec104Error::TooManyUnconfirmed(1))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_t3_sends_test_frame_then_t1_fails() {
        let mock = Builder::new()
            .write(&[0x68, 0x04, 0x43, 0x00, 0x00, 0x00])
            .build();
        let params = ConnectionParameters::default()
            .t1(Duration::from_secs(2))
            .t3(Duration::from_secs(5));
        let mut session = session(mock, params);

        let start = Instant::now();
        assert_eq!(session.next_deadline(), start + Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(5)).await;
        session.on_timer(Instant::now()).await.unwrap();
        assert!(session.is_pending(UFunction::TestFrAct));
        assert_eq!(session.next_deadline(), start + Duration::from_secs(7));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            session.on_timer(Instant::now()).await,
            Err(Iec104Error::T1Timeout)
        ));
    }

    #[tokio::test]
    async fn test_confirmation_clears_pending() {
        let mock = Builder::new()
            .write(&[0x68, 0x04, 0x07, 0x00, 0x00, 0x00])
            .read(&[0x68, 0x04, 0x0B, 0x00, 0x00, 0x00])
            .build();
        let mut session = session(mock, ConnectionParameters::default());

        session.send_u(UFunction::StartDtAct).await.unwrap();
        assert!(session.is_pending(UFunction::StartDtAct));

        let apdu = session.next_frame().await.unwrap().unwrap();
        assert!(matches!(
            session.receive(apdu).await.unwrap(),
            Inbound::Control(UFunction::StartDtCon)
        ));
        assert!(!session.is_pending(UFunction::StartDtAct));
    }
}
