//! Sequence numbering and acknowledgement bookkeeping of one link.
//!
//! `LinkState` is pure: every operation takes the current instant, so the
//! connection tasks own the clock and the window logic can be tested
//! without a runtime.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Iec104Error, Result};
use crate::parameters::ConnectionParameters;
use crate::types::{Apci, SEQUENCE_MODULO};

/// Number of steps from `from` forward to `to`, modulo 2^15.
#[inline]
fn distance(from: u16, to: u16) -> u16 {
    ((to as u32 + SEQUENCE_MODULO as u32 - from as u32) % SEQUENCE_MODULO as u32) as u16
}

#[inline]
fn increment(seq: u16) -> u16 {
    (seq + 1) % SEQUENCE_MODULO
}

/// Send/receive state of one IEC 104 link.
#[derive(Debug, Clone)]
pub struct LinkState {
    k: u16,
    w: u16,
    t1: Duration,
    t2: Duration,
    send_count: u16,
    receive_count: u16,
    unconfirmed_received: u16,
    first_unconfirmed_at: Option<Instant>,
    outstanding: VecDeque<(u16, Instant)>,
}

impl LinkState {
    /// Create a link state with counters at zero.
    pub fn new(params: &ConnectionParameters) -> Self {
        Self {
            k: params.k,
            w: params.w,
            t1: params.t1,
            t2: params.t2,
            send_count: 0,
            receive_count: 0,
            unconfirmed_received: 0,
            first_unconfirmed_at: None,
            outstanding: VecDeque::with_capacity(params.k as usize),
        }
    }

    /// Send sequence number of the next I-frame.
    #[inline]
    pub fn send_count(&self) -> u16 {
        self.send_count
    }

    /// Number of I-frames received so far, modulo 2^15.
    #[inline]
    pub fn receive_count(&self) -> u16 {
        self.receive_count
    }

    /// Received I-frames not yet acknowledged towards the peer.
    #[inline]
    pub fn unconfirmed_received(&self) -> u16 {
        self.unconfirmed_received
    }

    /// Sent I-frames not yet acknowledged by the peer.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Whether the k window allows another I-frame.
    #[inline]
    pub fn can_send(&self) -> bool {
        self.outstanding.len() < self.k as usize
    }

    /// Stamp the next I-frame and record it as outstanding.
    ///
    /// The I-frame carries N(R), so it also acknowledges everything received.
    pub fn prepare_i_frame(&mut self, now: Instant) -> Apci {
        let apci = Apci::i_frame(self.send_count, self.receive_count);
        self.outstanding.push_back((self.send_count, now));
        self.send_count = increment(self.send_count);
        self.clear_unconfirmed();
        apci
    }

    /// Build an S-frame acknowledging everything received.
    pub fn prepare_s_frame(&mut self) -> Apci {
        self.clear_unconfirmed();
        Apci::s_frame(self.receive_count)
    }

    /// Account for a received I-frame.
    ///
    /// Fails when N(S) is not the expected receive count or N(R)
    /// acknowledges frames that were never sent.
    pub fn on_i_frame(&mut self, send_seq: u16, recv_seq: u16, now: Instant) -> Result<()> {
        if send_seq != self.receive_count {
            return Err(Iec104Error::SequenceMismatch {
                expected: self.receive_count,
                actual: send_seq,
            });
        }
        self.acknowledge(recv_seq)?;

        self.receive_count = increment(self.receive_count);
        if self.unconfirmed_received == 0 {
            self.first_unconfirmed_at = Some(now);
        }
        self.unconfirmed_received = self.unconfirmed_received.saturating_add(1);
        Ok(())
    }

    /// Release outstanding I-frames acknowledged by N(R) = `recv_seq`.
    pub fn acknowledge(&mut self, recv_seq: u16) -> Result<()> {
        let outstanding = self.outstanding.len() as u16;
        let oldest = distance(outstanding, self.send_count);
        let acked = distance(oldest, recv_seq);
        if acked > outstanding {
            return Err(Iec104Error::protocol(format!(
                "invalid acknowledgement N(R)={} (send count {}, {} outstanding)",
                recv_seq, self.send_count, outstanding
            )));
        }
        self.outstanding.drain(..acked as usize);
        Ok(())
    }

    /// Whether an S-frame is due: more than w unacknowledged receptions, or
    /// t2 elapsed since the first of them.
    pub fn ack_required(&self, now: Instant) -> bool {
        self.unconfirmed_received > self.w
            || self.ack_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Instant the t2 acknowledgement timer fires, if armed.
    #[inline]
    pub fn ack_deadline(&self) -> Option<Instant> {
        self.first_unconfirmed_at.map(|first| first + self.t2)
    }

    /// Instant the oldest outstanding I-frame times out (t1), if any.
    #[inline]
    pub fn t1_deadline(&self) -> Option<Instant> {
        self.outstanding.front().map(|(_, sent)| *sent + self.t1)
    }

    /// Whether the oldest outstanding I-frame was not acknowledged within t1.
    pub fn t1_expired(&self, now: Instant) -> bool {
        self.t1_deadline().is_some_and(|deadline| now >= deadline)
    }

    fn clear_unconfirmed(&mut self) {
        self.unconfirmed_received = 0;
        self.first_unconfirmed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParameters {
        ConnectionParameters::default()
            .k(4)
            .w(2)
            .t1(Duration::from_secs(15))
            .t2(Duration::from_secs(10))
    }

    #[test]
    fn test_distance_wraps() {
        assert_eq!(distance(0, 0), 0);
        assert_eq!(distance(10, 15), 5);
        assert_eq!(distance(32766, 1), 3);
    }

    #[test]
    fn test_send_count_modulo() {
        let mut link = LinkState::new(&params());
        let now = Instant::now();

        for n in 1..=32770u32 {
            let apci = link.prepare_i_frame(now);
            assert_eq!(apci.send_seq(), Some(((n - 1) % 32768) as u16));
            link.acknowledge(link.send_count()).unwrap();
        }
        assert_eq!(link.send_count(), (32770 % 32768) as u16);
        assert_eq!(link.outstanding(), 0);
    }

    #[test]
    fn test_s_frame_after_more_than_w() {
        let mut link = LinkState::new(&params());
        let now = Instant::now();

        link.on_i_frame(0, 0, now).unwrap();
        link.on_i_frame(1, 0, now).unwrap();
        assert!(!link.ack_required(now));

        link.on_i_frame(2, 0, now).unwrap();
        assert!(link.ack_required(now));
        assert_eq!(link.receive_count(), 3);

        let apci = link.prepare_s_frame();
        assert_eq!(apci, Apci::s_frame(3));
        assert_eq!(link.unconfirmed_received(), 0);
        assert!(!link.ack_required(now));
    }

    #[test]
    fn test_s_frame_after_t2() {
        let mut link = LinkState::new(&params());
        let start = Instant::now();

        link.on_i_frame(0, 0, start).unwrap();
        assert_eq!(link.ack_deadline(), Some(start + Duration::from_secs(10)));
        assert!(!link.ack_required(start + Duration::from_secs(9)));

        // a later frame does not restart the timer
        link.on_i_frame(1, 0, start + Duration::from_secs(5)).unwrap();
        assert!(link.ack_required(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_i_frame_acknowledges_received() {
        let mut link = LinkState::new(&params());
        let now = Instant::now();

        link.on_i_frame(0, 0, now).unwrap();
        let apci = link.prepare_i_frame(now);
        assert_eq!(apci, Apci::i_frame(0, 1));
        assert_eq!(link.unconfirmed_received(), 0);
        assert_eq!(link.ack_deadline(), None);
    }

    #[test]
    fn test_sequence_mismatch() {
        let mut link = LinkState::new(&params());
        let now = Instant::now();

        link.on_i_frame(0, 0, now).unwrap();
        let err = link.on_i_frame(5, 0, now).unwrap_err();
        assert!(matches!(
            err,
            Iec104Error::SequenceMismatch {
                expected: 1,
                actual: 5
            }
        ));
        assert_eq!(link.receive_count(), 1);
    }

    #[test]
    fn test_acknowledge_releases_window() {
        let mut link = LinkState::new(&params());
        let now = Instant::now();

        for _ in 0..4 {
            assert!(link.can_send());
            link.prepare_i_frame(now);
        }
        assert!(!link.can_send());

        link.acknowledge(2).unwrap();
        assert_eq!(link.outstanding(), 2);
        assert!(link.can_send());

        // acknowledging the same number again is harmless
        link.acknowledge(2).unwrap();
        assert_eq!(link.outstanding(), 2);
    }

    #[test]
    fn test_invalid_acknowledgement() {
        let mut link = LinkState::new(&params());
        let now = Instant::now();

        link.prepare_i_frame(now);
        link.prepare_i_frame(now);
        assert!(matches!(
            link.acknowledge(3),
            Err(Iec104Error::Protocol(_))
        ));
        assert_eq!(link.outstanding(), 2);

        // nothing sent yet: only N(R)=0 is valid
        let mut fresh = LinkState::new(&params());
        assert!(fresh.acknowledge(0).is_ok());
        assert!(fresh.on_i_frame(0, 1, now).is_err());
    }

    #[test]
    fn test_t1_deadline_tracks_oldest() {
        let mut link = LinkState::new(&params());
        let start = Instant::now();

        assert_eq!(link.t1_deadline(), None);
        link.prepare_i_frame(start);
        link.prepare_i_frame(start + Duration::from_secs(3));
        assert_eq!(link.t1_deadline(), Some(start + Duration::from_secs(15)));
        assert!(link.t1_expired(start + Duration::from_secs(15)));

        link.acknowledge(1).unwrap();
        assert_eq!(link.t1_deadline(), Some(start + Duration::from_secs(18)));
        assert!(!link.t1_expired(start + Duration::from_secs(15)));
    }
}
