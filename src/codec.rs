//! IEC 60870-5-104 codec for tokio.
//!
//! This module frames APDUs using the tokio-util codec framework. Framing is
//! strict: a frame that does not start with 0x68 or declares a length outside
//! 4..=253 leaves the byte stream unrecoverable and is reported as an error,
//! which terminates the `Framed` stream. ASDU content is not interpreted here.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Iec104Error;
use crate::types::{
    Apci, UFunction, MAX_APDU_LENGTH, MAX_ASDU_LENGTH, MIN_APDU_LENGTH, START_BYTE,
};

/// Direction of a raw frame passed to a [`RawMessageHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frame written to the peer
    Sent,
    /// Frame read from the peer
    Received,
}

/// Observer for every complete frame sent or received.
pub type RawMessageHandler = Arc<dyn Fn(&[u8], Direction) + Send + Sync>;

/// An IEC 104 APDU (Application Protocol Data Unit).
///
/// Contains the APCI header and, for I-frames, the encoded ASDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    /// APCI (Application Protocol Control Information)
    pub apci: Apci,
    /// Encoded ASDU, only present in I-frames
    pub asdu: Option<Bytes>,
}

impl Apdu {
    /// Create a new I-frame APDU with ASDU.
    pub fn i_frame(send_seq: u16, recv_seq: u16, asdu: Bytes) -> Self {
        Self {
            apci: Apci::i_frame(send_seq, recv_seq),
            asdu: Some(asdu),
        }
    }

    /// Create a new S-frame APDU.
    pub fn s_frame(recv_seq: u16) -> Self {
        Self {
            apci: Apci::s_frame(recv_seq),
            asdu: None,
        }
    }

    /// Create a new U-frame APDU.
    pub fn u_frame(function: UFunction) -> Self {
        Self {
            apci: Apci::u_frame(function),
            asdu: None,
        }
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if let Some(asdu) = &self.asdu {
            write!(f, " [{} bytes]", asdu.len())?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 codec.
///
/// # Example
///
/// ```rust,ignore
/// use futures::{SinkExt, StreamExt};
/// use tokio_util::codec::Framed;
/// use voltage_iec60870::codec::{Apdu, Iec104Codec};
///
/// let stream = TcpStream::connect("192.168.1.100:2404").await?;
/// let mut framed = Framed::new(stream, Iec104Codec::new());
///
/// framed.send(Apdu::u_frame(UFunction::StartDtAct)).await?;
///
/// while let Some(apdu) = framed.next().await {
///     println!("Received: {}", apdu?);
/// }
/// ```
#[derive(Clone, Default)]
pub struct Iec104Codec {
    raw_handler: Option<RawMessageHandler>,
}

impl std::fmt::Debug for Iec104Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iec104Codec")
            .field("raw_handler", &self.raw_handler.is_some())
            .finish()
    }
}

impl Iec104Codec {
    /// Create a new IEC 104 codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that reports every frame to `handler`.
    pub fn with_raw_handler(handler: Option<RawMessageHandler>) -> Self {
        Self {
            raw_handler: handler,
        }
    }
}

impl Decoder for Iec104Codec {
    type Item = Apdu;
    type Error = Iec104Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != START_BYTE {
            return Err(Iec104Error::protocol(format!(
                "invalid start byte 0x{:02X}",
                src[0]
            )));
        }
        if src.len() < 2 {
            return Ok(None);
        }

        let length = src[1] as usize;
        if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
            return Err(Iec104Error::protocol(format!(
                "invalid APDU length {}",
                length
            )));
        }

        let total_length = 2 + length;
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total_length).freeze();
        if let Some(handler) = &self.raw_handler {
            handler(&frame, Direction::Received);
        }

        let apci = Apci::parse(&frame[2..6])?;
        let asdu = match (apci.is_i_frame(), frame.len() > 6) {
            (true, true) => Some(frame.slice(6..)),
            (true, false) => return Err(Iec104Error::protocol("I-frame without ASDU")),
            (false, true) => {
                return Err(Iec104Error::protocol(format!(
                    "{} frame with {} trailing bytes",
                    apci,
                    frame.len() - 6
                )))
            }
            (false, false) => None,
        };

        Ok(Some(Apdu { apci, asdu }))
    }
}

impl Encoder<Apdu> for Iec104Codec {
    type Error = Iec104Error;

    fn encode(&mut self, item: Apdu, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let asdu_len = item.asdu.as_ref().map_or(0, |asdu| asdu.len());
        if asdu_len > MAX_ASDU_LENGTH {
            return Err(Iec104Error::protocol(format!(
                "ASDU of {} bytes exceeds {}",
                asdu_len, MAX_ASDU_LENGTH
            )));
        }

        let start = dst.len();
        dst.reserve(6 + asdu_len);
        dst.put_u8(START_BYTE);
        dst.put_u8((MIN_APDU_LENGTH + asdu_len) as u8);
        dst.extend_from_slice(&item.apci.encode());
        if let Some(asdu) = &item.asdu {
            dst.extend_from_slice(asdu);
        }

        if let Some(handler) = &self.raw_handler {
            handler(&dst[start..], Direction::Sent);
        }
        Ok(())
    }
}
