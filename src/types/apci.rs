//! IEC 60870-5-104 APCI (Application Protocol Control Information).
//!
//! APCI is the 6-byte header of an APDU, containing frame type and sequence numbers.

use crate::error::{Iec104Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Minimum APDU length (control field only, no ASDU).
pub const MIN_APDU_LENGTH: usize = 4;

/// Maximum APDU length.
pub const MAX_APDU_LENGTH: usize = 253;

/// Maximum ASDU length carried by one I-frame.
pub const MAX_ASDU_LENGTH: usize = MAX_APDU_LENGTH - MIN_APDU_LENGTH;

/// Sequence numbers count modulo 2^15.
pub const SEQUENCE_MODULO: u16 = 32768;

/// APCI frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// I-frame: Information transfer
    IFrame,
    /// S-frame: Supervisory (acknowledgment)
    SFrame,
    /// U-frame: Unnumbered (control)
    UFrame,
}

/// U-frame function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFunction {
    /// STARTDT act (Start Data Transfer activation)
    StartDtAct,
    /// STARTDT con (Start Data Transfer confirmation)
    StartDtCon,
    /// STOPDT act (Stop Data Transfer activation)
    StopDtAct,
    /// STOPDT con (Stop Data Transfer confirmation)
    StopDtCon,
    /// TESTFR act (Test Frame activation)
    TestFrAct,
    /// TESTFR con (Test Frame confirmation)
    TestFrCon,
    /// Control byte with no defined function; received frames of this kind
    /// are ignored
    Unknown(u8),
}

impl UFunction {
    /// Get the control field byte for this U-function.
    #[inline]
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07, // 0000 0111
            Self::StartDtCon => 0x0B, // 0000 1011
            Self::StopDtAct => 0x13,  // 0001 0011
            Self::StopDtCon => 0x23,  // 0010 0011
            Self::TestFrAct => 0x43,  // 0100 0011
            Self::TestFrCon => 0x83,  // 1000 0011
            Self::Unknown(byte) => *byte,
        }
    }

    /// Parse U-function from control byte.
    #[inline]
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        match Self::from_raw(byte) {
            Self::Unknown(byte) => Err(Iec104Error::protocol(format!(
                "unknown U-frame function 0x{:02X}",
                byte
            ))),
            function => Ok(function),
        }
    }

    /// Map a control byte to its function, keeping undefined bytes as
    /// [`UFunction::Unknown`].
    #[inline]
    pub const fn from_raw(byte: u8) -> Self {
        match byte {
            0x07 => Self::StartDtAct,
            0x0B => Self::StartDtCon,
            0x13 => Self::StopDtAct,
            0x23 => Self::StopDtCon,
            0x43 => Self::TestFrAct,
            0x83 => Self::TestFrCon,
            other => Self::Unknown(other),
        }
    }

    /// The confirmation answering this activation, if it is one.
    #[inline]
    pub const fn confirmation(&self) -> Option<Self> {
        match self {
            Self::StartDtAct => Some(Self::StartDtCon),
            Self::StopDtAct => Some(Self::StopDtCon),
            Self::TestFrAct => Some(Self::TestFrCon),
            _ => None,
        }
    }
}

/// APCI (Application Protocol Control Information).
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+
/// | 0x68   | Length | CF1    | CF2    | CF3    | CF4    |
/// +--------+--------+--------+--------+--------+--------+
///   Start    APDU     Control Field (4 bytes)
///   Byte     Length
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame with send and receive sequence numbers.
    IFrame {
        /// Send sequence number (0-32767)
        send_seq: u16,
        /// Receive sequence number (0-32767)
        recv_seq: u16,
    },
    /// S-frame with receive sequence number only.
    SFrame {
        /// Receive sequence number (0-32767)
        recv_seq: u16,
    },
    /// U-frame with function code.
    UFrame {
        /// U-frame function
        function: UFunction,
    },
}

#[inline]
fn decode_seq(low: u8, high: u8) -> u16 {
    ((high as u16) << 7) | ((low >> 1) as u16)
}

#[inline]
fn encode_seq(seq: u16) -> [u8; 2] {
    let seq = seq % SEQUENCE_MODULO;
    [((seq & 0x7F) << 1) as u8, (seq >> 7) as u8]
}

impl Apci {
    /// Create a new I-frame APCI.
    #[inline]
    pub fn i_frame(send_seq: u16, recv_seq: u16) -> Self {
        Self::IFrame { send_seq, recv_seq }
    }

    /// Create a new S-frame APCI.
    #[inline]
    pub fn s_frame(recv_seq: u16) -> Self {
        Self::SFrame { recv_seq }
    }

    /// Create a new U-frame APCI.
    #[inline]
    pub fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::IFrame { .. } => FrameType::IFrame,
            Self::SFrame { .. } => FrameType::SFrame,
            Self::UFrame { .. } => FrameType::UFrame,
        }
    }

    /// Parse the 4 control octets.
    pub fn parse(control: &[u8]) -> Result<Self> {
        let [cf1, cf2, cf3, cf4] = match control {
            [a, b, c, d, ..] => [*a, *b, *c, *d],
            _ => {
                return Err(Iec104Error::protocol(format!(
                    "control field needs 4 bytes, got {}",
                    control.len()
                )))
            }
        };

        if cf1 & 0x01 == 0 {
            Ok(Self::IFrame {
                send_seq: decode_seq(cf1, cf2),
                recv_seq: decode_seq(cf3, cf4),
            })
        } else if cf1 & 0x03 == 0x01 {
            Ok(Self::SFrame {
                recv_seq: decode_seq(cf3, cf4),
            })
        } else {
            Ok(Self::UFrame {
                function: UFunction::from_raw(cf1),
            })
        }
    }

    /// Encode to 4 control octets.
    #[inline]
    pub fn encode(&self) -> [u8; 4] {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                let [s0, s1] = encode_seq(*send_seq);
                let [r0, r1] = encode_seq(*recv_seq);
                [s0, s1, r0, r1]
            }
            Self::SFrame { recv_seq } => {
                let [r0, r1] = encode_seq(*recv_seq);
                [0x01, 0x00, r0, r1]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Check if this is an I-frame.
    #[inline]
    pub fn is_i_frame(&self) -> bool {
        matches!(self, Self::IFrame { .. })
    }

    /// Get the send sequence number (I-frame only).
    #[inline]
    pub fn send_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { send_seq, .. } => Some(*send_seq),
            _ => None,
        }
    }

    /// Get the receive sequence number (I-frame and S-frame).
    #[inline]
    pub fn recv_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { recv_seq, .. } | Self::SFrame { recv_seq } => Some(*recv_seq),
            _ => None,
        }
    }
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                write!(f, "I(S={}, R={})", send_seq, recv_seq)
            }
            Self::SFrame { recv_seq } => {
                write!(f, "S(R={})", recv_seq)
            }
            Self::UFrame { function } => {
                let name = match function {
                    UFunction::StartDtAct => "STARTDT act",
                    UFunction::StartDtCon => "STARTDT con",
                    UFunction::StopDtAct => "STOPDT act",
                    UFunction::StopDtCon => "STOPDT con",
                    UFunction::TestFrAct => "TESTFR act",
                    UFunction::TestFrCon => "TESTFR con",
                    UFunction::Unknown(byte) => return write!(f, "U(0x{:02X})", byte),
                };
                write!(f, "U({})", name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i_frame_bytes() {
        // S=1, R=2 -> 02 00 04 00
        let apci = Apci::i_frame(1, 2);
        assert_eq!(apci.encode(), [0x02, 0x00, 0x04, 0x00]);
        assert_eq!(Apci::parse(&apci.encode()).unwrap(), apci);
    }

    #[test]
    fn test_s_frame_bytes() {
        let apci = Apci::s_frame(300);
        // 300 = 0b10_0101100 -> low 0x2C << 1, high 2
        assert_eq!(apci.encode(), [0x01, 0x00, 0x58, 0x02]);

        let decoded = Apci::parse(&apci.encode()).unwrap();
        assert_eq!(decoded, apci);
        assert_eq!(decoded.send_seq(), None);
        assert_eq!(decoded.recv_seq(), Some(300));
    }

    #[test]
    fn test_u_frame_encode_decode() {
        for func in [
            UFunction::StartDtAct,
            UFunction::StartDtCon,
            UFunction::StopDtAct,
            UFunction::StopDtCon,
            UFunction::TestFrAct,
            UFunction::TestFrCon,
        ] {
            let apci = Apci::u_frame(func);
            let decoded = Apci::parse(&apci.encode()).unwrap();
            assert_eq!(decoded, apci);
            assert_eq!(decoded.recv_seq(), None);
        }
    }

    #[test]
    fn test_u_function_confirmation() {
        assert_eq!(
            UFunction::StartDtAct.confirmation(),
            Some(UFunction::StartDtCon)
        );
        assert_eq!(UFunction::TestFrAct.confirmation(), Some(UFunction::TestFrCon));
        assert_eq!(UFunction::TestFrCon.confirmation(), None);
    }

    #[test]
    fn test_u_function_from_invalid_byte() {
        for byte in [0x03, 0x0F, 0x33, 0xC3, 0xFF] {
            let result = UFunction::from_control_byte(byte);
            assert!(
                matches!(result, Err(Iec104Error::Protocol(_))),
                "Expected error for byte 0x{:02X}",
                byte
            );
        }
    }

    #[test]
    fn test_unknown_u_frame_parses() {
        let decoded = Apci::parse(&[0x03, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(decoded, Apci::u_frame(UFunction::Unknown(0x03)));
        assert_eq!(decoded.encode(), [0x03, 0x00, 0x00, 0x00]);
        assert_eq!(decoded.to_string(), "U(0x03)");
    }

    #[test]
    fn test_apci_parse_too_short() {
        assert!(Apci::parse(&[0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_sequence_number_edge_cases() {
        for val in [0, 1, 127, 128, 255, 256, 16383, 16384, 32766, 32767] {
            let apci = Apci::i_frame(val, 32767 - val);
            let decoded = Apci::parse(&apci.encode()).unwrap();
            assert_eq!(decoded.send_seq(), Some(val), "Failed for value {}", val);
            assert_eq!(decoded.recv_seq(), Some(32767 - val));
        }
    }

    #[test]
    fn test_sequence_number_wraps() {
        let apci = Apci::i_frame(32768, 32769);
        let decoded = Apci::parse(&apci.encode()).unwrap();
        assert_eq!(decoded.send_seq(), Some(0));
        assert_eq!(decoded.recv_seq(), Some(1));
    }

    #[test]
    fn test_apci_display() {
        assert_eq!(Apci::i_frame(10, 5).to_string(), "I(S=10, R=5)");
        assert_eq!(Apci::s_frame(20).to_string(), "S(R=20)");
        assert_eq!(
            Apci::u_frame(UFunction::StartDtAct).to_string(),
            "U(STARTDT act)"
        );
    }

    #[test]
    fn test_frame_type() {
        assert_eq!(Apci::i_frame(0, 0).frame_type(), FrameType::IFrame);
        assert!(Apci::i_frame(0, 0).is_i_frame());
        assert_eq!(Apci::s_frame(0).frame_type(), FrameType::SFrame);
        assert_eq!(
            Apci::u_frame(UFunction::TestFrAct).frame_type(),
            FrameType::UFrame
        );
        assert_eq!(MAX_ASDU_LENGTH, 249);
    }
}
