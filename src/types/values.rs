//! Fixed-width value codecs used inside information elements.

use bytes::BytesMut;

use super::quality::QualityDescriptorP;
use super::wire::{read, Wire};
use crate::error::{Iec104Error, Result};

/// Qualifier of interrogation: station interrogation (global).
pub const QOI_STATION: u8 = 20;

/// Qualifier of counter interrogation: general request counter, no freeze.
pub const QCC_GENERAL_REQUEST: u8 = 5;

/// Qualifier of reset process: general reset of process.
pub const QRP_GENERAL_RESET: u8 = 1;

/// Qualifier of reset process: reset of pending information with time tag.
pub const QRP_RESET_PENDING_EVENTS: u8 = 2;

/// Fixed pattern carried by the test command (FBP).
pub const TEST_PATTERN: u16 = 0x55AA;

/// Scaled value (SVA): 16-bit signed integer.
///
/// Values outside of `i16` range are clamped to the nearest boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ScaledValue(i16);

impl ScaledValue {
    /// Create a scaled value, clamping to -32768..=32767.
    #[inline]
    pub fn new(value: i32) -> Self {
        Self(value.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
    }

    /// Create a scaled value from a float, clamping to the 16-bit range.
    #[inline]
    pub fn from_f32(value: f32) -> Self {
        // `as` saturates on overflow and maps NaN to 0
        Self::new(value.round() as i32)
    }

    /// The raw 16-bit value.
    #[inline]
    pub const fn value(&self) -> i16 {
        self.0
    }
}

impl From<i16> for ScaledValue {
    fn from(value: i16) -> Self {
        Self(value)
    }
}

impl Wire for ScaledValue {
    const SIZE: usize = 2;

    fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self(i16::from_le_bytes(read::<2>(buf)?)))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.0.to_le_bytes());
    }
}

/// Normalized value (NVA): a 16-bit fixed point fraction in [-1, 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct NormalizedValue(i16);

impl NormalizedValue {
    /// Create from a float, clamping to [-1.0, 1.0].
    pub fn new(value: f32) -> Self {
        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(-1.0, 1.0)
        };
        Self((value * 32767.0).round() as i16)
    }

    /// Create from the raw 16-bit representation.
    #[inline]
    pub const fn from_raw(raw: i16) -> Self {
        Self(raw)
    }

    /// The raw 16-bit representation.
    #[inline]
    pub const fn raw(&self) -> i16 {
        self.0
    }

    /// The normalized value as float.
    #[inline]
    pub fn value(&self) -> f32 {
        self.0 as f32 / 32767.0
    }
}

impl Wire for NormalizedValue {
    const SIZE: usize = 2;

    fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self(i16::from_le_bytes(read::<2>(buf)?)))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.0.to_le_bytes());
    }
}

impl Wire for f32 {
    const SIZE: usize = 4;

    fn decode(buf: &[u8]) -> Result<Self> {
        Ok(f32::from_le_bytes(read::<4>(buf)?))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Wire for u32 {
    const SIZE: usize = 4;

    fn decode(buf: &[u8]) -> Result<Self> {
        Ok(u32::from_le_bytes(read::<4>(buf)?))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Wire for u16 {
    const SIZE: usize = 2;

    fn decode(buf: &[u8]) -> Result<Self> {
        Ok(u16::from_le_bytes(read::<2>(buf)?))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

/// Binary counter reading (BCR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinaryCounterReading {
    /// Counter value
    pub value: i32,
    /// Sequence number (0-31)
    pub sequence_number: u8,
    /// Counter overflow occurred (CY)
    pub carry: bool,
    /// Counter was adjusted (CA)
    pub adjusted: bool,
    /// Reading is invalid (IV)
    pub invalid: bool,
}

impl BinaryCounterReading {
    /// Create a valid reading.
    pub fn new(value: i32, sequence_number: u8) -> Self {
        Self {
            value,
            sequence_number: sequence_number & 0x1F,
            ..Default::default()
        }
    }
}

impl Wire for BinaryCounterReading {
    const SIZE: usize = 5;

    fn decode(buf: &[u8]) -> Result<Self> {
        let b = read::<5>(buf)?;
        Ok(Self {
            value: i32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            sequence_number: b[4] & 0x1F,
            carry: b[4] & 0x20 != 0,
            adjusted: b[4] & 0x40 != 0,
            invalid: b[4] & 0x80 != 0,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut flags = self.sequence_number & 0x1F;
        if self.carry {
            flags |= 0x20;
        }
        if self.adjusted {
            flags |= 0x40;
        }
        if self.invalid {
            flags |= 0x80;
        }
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&[flags]);
    }
}

/// Value with transient state indication (VTI), used by step positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepPosition {
    value: i8,
    transient: bool,
}

impl StepPosition {
    /// Smallest encodable step position.
    pub const MIN: i8 = -64;
    /// Largest encodable step position.
    pub const MAX: i8 = 63;

    /// Create a step position, failing when `value` is outside -64..=63.
    pub fn new(value: i32, transient: bool) -> Result<Self> {
        if !(Self::MIN as i32..=Self::MAX as i32).contains(&value) {
            return Err(Iec104Error::range(format!(
                "step position {} outside {}..={}",
                value,
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self {
            value: value as i8,
            transient,
        })
    }

    /// Step position value (-64..=63).
    #[inline]
    pub const fn value(&self) -> i8 {
        self.value
    }

    /// Equipment is in transient state.
    #[inline]
    pub const fn is_transient(&self) -> bool {
        self.transient
    }
}

impl Wire for StepPosition {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        let raw = (b & 0x7F) as i16;
        Ok(Self {
            value: (if raw > 63 { raw - 128 } else { raw }) as i8,
            transient: b & 0x80 != 0,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut b = (self.value as u8) & 0x7F;
        if self.transient {
            b |= 0x80;
        }
        buf.extend_from_slice(&[b]);
    }
}

/// Double-point information value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoublePointValue {
    /// Indeterminate or intermediate state (00)
    #[default]
    Intermediate = 0,
    /// Determined OFF (01)
    Off = 1,
    /// Determined ON (10)
    On = 2,
    /// Indeterminate state (11)
    Indeterminate = 3,
}

impl DoublePointValue {
    /// Parse from byte (lower 2 bits).
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Intermediate,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::Indeterminate,
        }
    }

    /// Convert to the 2-bit representation.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Single event of protection equipment (SEP without elapsed time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SingleEvent {
    /// Event state (ES)
    pub state: DoublePointValue,
    /// Quality of the event
    pub quality: QualityDescriptorP,
}

impl Wire for SingleEvent {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(Self {
            state: DoublePointValue::from_u8(b),
            quality: QualityDescriptorP::from_u8(b & 0xFC),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.state.as_u8() | (self.quality.as_u8() & 0xFC)]);
    }
}

/// Start events of protection equipment (SPE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartEvent {
    /// General start of operation (GS)
    pub general_start: bool,
    /// Start of operation phase L1 (SL1)
    pub phase_l1: bool,
    /// Start of operation phase L2 (SL2)
    pub phase_l2: bool,
    /// Start of operation phase L3 (SL3)
    pub phase_l3: bool,
    /// Start of operation IE, earth current (SIE)
    pub earth_current: bool,
    /// Start of operation in reverse direction (SRD)
    pub reverse_direction: bool,
}

impl StartEvent {
    /// Parse from SPE byte.
    pub fn from_u8(value: u8) -> Self {
        Self {
            general_start: value & 0x01 != 0,
            phase_l1: value & 0x02 != 0,
            phase_l2: value & 0x04 != 0,
            phase_l3: value & 0x08 != 0,
            earth_current: value & 0x10 != 0,
            reverse_direction: value & 0x20 != 0,
        }
    }

    /// Encode to SPE byte.
    pub fn as_u8(&self) -> u8 {
        [
            self.general_start,
            self.phase_l1,
            self.phase_l2,
            self.phase_l3,
            self.earth_current,
            self.reverse_direction,
        ]
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .fold(0u8, |acc, (bit, _)| acc | (1u8 << bit))
    }
}

impl Wire for StartEvent {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(Self::from_u8(b))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.as_u8()]);
    }
}

/// Output circuit information of protection equipment (OCI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputCircuitInfo {
    /// General command to output circuit (GC)
    pub general: bool,
    /// Command to output circuit phase L1 (CL1)
    pub phase_l1: bool,
    /// Command to output circuit phase L2 (CL2)
    pub phase_l2: bool,
    /// Command to output circuit phase L3 (CL3)
    pub phase_l3: bool,
}

impl Wire for OutputCircuitInfo {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(Self {
            general: b & 0x01 != 0,
            phase_l1: b & 0x02 != 0,
            phase_l2: b & 0x04 != 0,
            phase_l3: b & 0x08 != 0,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        let b = (self.general as u8)
            | (self.phase_l1 as u8) << 1
            | (self.phase_l2 as u8) << 2
            | (self.phase_l3 as u8) << 3;
        buf.extend_from_slice(&[b]);
    }
}

/// Status and status change detection (SCD) of 16 single points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusAndStatusChangeDetection {
    /// Status bits (STn)
    pub status: u16,
    /// Status change detection bits (CDn)
    pub change_detection: u16,
}

impl StatusAndStatusChangeDetection {
    /// Status of point `index` (0-15).
    pub fn status_bit(&self, index: u8) -> bool {
        index < 16 && self.status & (1 << index) != 0
    }

    /// Whether point `index` (0-15) changed since the last report.
    pub fn change_bit(&self, index: u8) -> bool {
        index < 16 && self.change_detection & (1 << index) != 0
    }
}

impl Wire for StatusAndStatusChangeDetection {
    const SIZE: usize = 4;

    fn decode(buf: &[u8]) -> Result<Self> {
        let b = read::<4>(buf)?;
        Ok(Self {
            status: u16::from_le_bytes([b[0], b[1]]),
            change_detection: u16::from_le_bytes([b[2], b[3]]),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.status.to_le_bytes());
        buf.extend_from_slice(&self.change_detection.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<T: Wire>(value: &T) -> Vec<u8> {
        let mut buf = BytesMut::new();
        value.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_scaled_value_boundaries() {
        for v in [i16::MIN, -1, 0, 1, i16::MAX] {
            let scaled = ScaledValue::from(v);
            let decoded = ScaledValue::decode(&encode(&scaled)).unwrap();
            assert_eq!(decoded.value(), v);
        }
        assert_eq!(encode(&ScaledValue::new(32767)), vec![0xFF, 0x7F]);
        assert_eq!(encode(&ScaledValue::new(-32768)), vec![0x00, 0x80]);
    }

    #[test]
    fn test_scaled_value_clamps() {
        assert_eq!(ScaledValue::new(40000).value(), i16::MAX);
        assert_eq!(ScaledValue::new(-40000).value(), i16::MIN);
        assert_eq!(ScaledValue::from_f32(1.0e9).value(), i16::MAX);
        assert_eq!(ScaledValue::from_f32(-1.0e9).value(), i16::MIN);
        assert_eq!(ScaledValue::from_f32(f32::NAN).value(), 0);
        // the encoded form of a clamped value is the boundary, not a wrapped value
        assert_eq!(encode(&ScaledValue::new(65536 + 5)), vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_normalized_value() {
        assert_eq!(NormalizedValue::new(1.0).raw(), 32767);
        assert_eq!(NormalizedValue::new(-1.0).raw(), -32767);
        assert_eq!(NormalizedValue::new(2.5).raw(), 32767);
        assert_eq!(NormalizedValue::new(0.0).raw(), 0);
        assert!((NormalizedValue::new(0.5).value() - 0.5).abs() < 0.0001);
        assert!((NormalizedValue::from_raw(-16384).value() + 0.5).abs() < 0.0001);
    }

    #[test]
    fn test_binary_counter_reading() {
        let bcr = BinaryCounterReading {
            value: -123456,
            sequence_number: 17,
            carry: true,
            adjusted: false,
            invalid: true,
        };
        let bytes = encode(&bcr);
        assert_eq!(bytes.len(), 5);
        assert_eq!(bytes[4], 17 | 0x20 | 0x80);
        assert_eq!(BinaryCounterReading::decode(&bytes).unwrap(), bcr);
        assert!(BinaryCounterReading::decode(&bytes[..4]).is_err());
    }

    #[test]
    fn test_step_position_range() {
        assert!(StepPosition::new(-64, false).is_ok());
        assert!(StepPosition::new(63, true).is_ok());
        assert!(matches!(
            StepPosition::new(64, false),
            Err(Iec104Error::Range(_))
        ));
        assert!(StepPosition::new(-65, false).is_err());
    }

    #[test]
    fn test_step_position_encoding() {
        let pos = StepPosition::new(-1, true).unwrap();
        assert_eq!(encode(&pos), vec![0xFF]);
        assert_eq!(StepPosition::decode(&[0xFF]).unwrap(), pos);

        let pos = StepPosition::new(-64, false).unwrap();
        assert_eq!(encode(&pos), vec![0x40]);
        assert_eq!(StepPosition::decode(&[0x40]).unwrap().value(), -64);
        assert_eq!(StepPosition::decode(&[0x3F]).unwrap().value(), 63);
    }

    #[test]
    fn test_double_point_value() {
        assert_eq!(DoublePointValue::from_u8(0xFD), DoublePointValue::Off);
        assert_eq!(DoublePointValue::from_u8(2), DoublePointValue::On);
        assert_eq!(DoublePointValue::Indeterminate.as_u8(), 3);
    }

    #[test]
    fn test_single_event() {
        let event = SingleEvent::decode(&[0x8A]).unwrap();
        assert_eq!(event.state, DoublePointValue::On);
        assert!(event.quality.invalid);
        assert!(event.quality.elapsed_time_invalid);
        assert_eq!(encode(&event), vec![0x8A]);
    }

    #[test]
    fn test_start_event_and_output_circuit() {
        let spe = StartEvent::from_u8(0x2B);
        assert!(spe.general_start);
        assert!(spe.phase_l1);
        assert!(!spe.phase_l2);
        assert!(spe.phase_l3);
        assert!(spe.reverse_direction);
        assert_eq!(spe.as_u8(), 0x2B);

        let oci = OutputCircuitInfo::decode(&[0x09]).unwrap();
        assert!(oci.general);
        assert!(oci.phase_l3);
        assert!(!oci.phase_l1);
        assert_eq!(encode(&oci), vec![0x09]);
    }

    #[test]
    fn test_status_change_detection() {
        let scd = StatusAndStatusChangeDetection::decode(&[0x01, 0x80, 0x02, 0x00]).unwrap();
        assert!(scd.status_bit(0));
        assert!(scd.status_bit(15));
        assert!(!scd.status_bit(1));
        assert!(scd.change_bit(1));
        assert!(!scd.change_bit(16));
        assert_eq!(encode(&scd), vec![0x01, 0x80, 0x02, 0x00]);
    }
}
