//! Information element payloads.
//!
//! Each payload is the fixed-width value part of an information object,
//! without the object address and without the optional time tag.

use bytes::BytesMut;

use super::quality::{QualityDescriptor, QualityDescriptorP};
use super::time::Cp16Time2a;
use super::values::{
    DoublePointValue, NormalizedValue, OutputCircuitInfo, ScaledValue, SingleEvent, StartEvent,
    StatusAndStatusChangeDetection, StepPosition,
};
use super::wire::{read, Wire};
use crate::error::{Iec104Error, Result};

/// Defines a payload whose fields are encoded back to back in declaration order.
macro_rules! sequential_element {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Default)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )+
        }

        impl Wire for $name {
            const SIZE: usize = 0 $( + <$ty as Wire>::SIZE )+;

            fn decode(buf: &[u8]) -> Result<Self> {
                if buf.len() < Self::SIZE {
                    return Err(Iec104Error::parsing(format!(
                        "{} needs {} bytes, got {}",
                        stringify!($name),
                        Self::SIZE,
                        buf.len()
                    )));
                }
                let mut offset = 0;
                $(
                    let $field = <$ty as Wire>::decode(&buf[offset..])?;
                    offset += <$ty as Wire>::SIZE;
                )+
                let _ = offset;
                Ok(Self { $( $field, )+ })
            }

            fn encode(&self, buf: &mut BytesMut) {
                $( self.$field.encode(buf); )+
            }
        }
    };
}

/// Single-point information with quality (SIQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinglePointInformation {
    /// Single-point value (SPI)
    pub value: bool,
    /// Quality descriptor
    pub quality: QualityDescriptor,
}

impl SinglePointInformation {
    /// Create a single-point value with good quality.
    pub fn new(value: bool) -> Self {
        Self {
            value,
            quality: QualityDescriptor::new(),
        }
    }
}

impl Wire for SinglePointInformation {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(Self {
            value: b & 0x01 != 0,
            quality: QualityDescriptor::from_siq(b),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.value as u8 | self.quality.to_siq()]);
    }
}

/// Double-point information with quality (DIQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoublePointInformation {
    /// Double-point value (DPI)
    pub value: DoublePointValue,
    /// Quality descriptor
    pub quality: QualityDescriptor,
}

impl DoublePointInformation {
    /// Create a double-point value with good quality.
    pub fn new(value: DoublePointValue) -> Self {
        Self {
            value,
            quality: QualityDescriptor::new(),
        }
    }
}

impl Wire for DoublePointInformation {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(Self {
            value: DoublePointValue::from_u8(b),
            quality: QualityDescriptor::from_siq(b),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.value.as_u8() | self.quality.to_siq()]);
    }
}

sequential_element! {
    /// Step position information (VTI + QDS).
    StepPositionInformation {
        /// Step position
        position: StepPosition,
        /// Quality descriptor
        quality: QualityDescriptor,
    }
}

sequential_element! {
    /// Bitstring of 32 bit (BSI + QDS).
    Bitstring32Information {
        /// Bitstring value
        value: u32,
        /// Quality descriptor
        quality: QualityDescriptor,
    }
}

sequential_element! {
    /// Measured value, normalized (NVA + QDS).
    MeasuredNormalized {
        /// Normalized value
        value: NormalizedValue,
        /// Quality descriptor
        quality: QualityDescriptor,
    }
}

sequential_element! {
    /// Measured value, scaled (SVA + QDS).
    MeasuredScaled {
        /// Scaled value
        value: ScaledValue,
        /// Quality descriptor
        quality: QualityDescriptor,
    }
}

sequential_element! {
    /// Measured value, short floating point (IEEE STD 754 + QDS).
    MeasuredFloat {
        /// Floating point value
        value: f32,
        /// Quality descriptor
        quality: QualityDescriptor,
    }
}

sequential_element! {
    /// Event of protection equipment (SEP + elapsed time).
    ProtectionEvent {
        /// Single event with quality
        event: SingleEvent,
        /// Elapsed time
        elapsed_time: Cp16Time2a,
    }
}

sequential_element! {
    /// Packed start events of protection equipment (SPE + QDP + relay duration).
    PackedStartEvents {
        /// Start events
        event: StartEvent,
        /// Quality descriptor
        quality: QualityDescriptorP,
        /// Relay duration time
        elapsed_time: Cp16Time2a,
    }
}

sequential_element! {
    /// Packed output circuit information of protection equipment (OCI + QDP + operating time).
    PackedOutputCircuitInfo {
        /// Output circuit information
        circuit: OutputCircuitInfo,
        /// Quality descriptor
        quality: QualityDescriptorP,
        /// Relay operating time
        operating_time: Cp16Time2a,
    }
}

sequential_element! {
    /// Packed single-point information with status change detection (SCD + QDS).
    PackedSinglePointWithScd {
        /// Status and status change detection
        scd: StatusAndStatusChangeDetection,
        /// Quality descriptor
        quality: QualityDescriptor,
    }
}

/// Command state carried by a double command (DCS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoubleCommandState {
    /// Not permitted (0)
    #[default]
    NotPermitted0 = 0,
    /// OFF (1)
    Off = 1,
    /// ON (2)
    On = 2,
    /// Not permitted (3)
    NotPermitted3 = 3,
}

impl DoubleCommandState {
    /// Parse from the lower 2 bits.
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::NotPermitted0,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::NotPermitted3,
        }
    }
}

/// Command state carried by a regulating step command (RCS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepCommandState {
    /// Not permitted (0)
    #[default]
    Invalid0 = 0,
    /// Next step lower (1)
    Lower = 1,
    /// Next step higher (2)
    Higher = 2,
    /// Not permitted (3)
    Invalid3 = 3,
}

impl StepCommandState {
    /// Parse from the lower 2 bits.
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Invalid0,
            1 => Self::Lower,
            2 => Self::Higher,
            _ => Self::Invalid3,
        }
    }
}

/// Pack a command state, qualifier of command (QU) and select flag (S/E).
#[inline]
fn command_octet(state: u8, qualifier: u8, select: bool) -> u8 {
    (state & 0x03) | ((qualifier & 0x1F) << 2) | if select { 0x80 } else { 0 }
}

macro_rules! command_element {
    ($(#[$meta:meta])* $name:ident, $state:ty, |$b:ident| $decode_state:expr, |$s:ident| $encode_state:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name {
            /// Command state
            pub state: $state,
            /// Qualifier of command (QU, 0-31)
            pub qualifier: u8,
            /// Select (true) or execute (false)
            pub select: bool,
        }

        impl $name {
            /// Create an execute command with no additional qualifier.
            pub fn new(state: $state) -> Self {
                Self {
                    state,
                    qualifier: 0,
                    select: false,
                }
            }
        }

        impl Wire for $name {
            const SIZE: usize = 1;

            fn decode(buf: &[u8]) -> Result<Self> {
                let [$b] = read::<1>(buf)?;
                Ok(Self {
                    state: $decode_state,
                    qualifier: ($b & 0x7C) >> 2,
                    select: $b & 0x80 != 0,
                })
            }

            fn encode(&self, buf: &mut BytesMut) {
                let $s = self.state;
                buf.extend_from_slice(&[command_octet($encode_state, self.qualifier, self.select)]);
            }
        }
    };
}

command_element!(
    /// Single command (SCO).
    SingleCommand,
    bool,
    |b| b & 0x01 != 0,
    |s| s as u8
);

command_element!(
    /// Double command (DCO).
    DoubleCommand,
    DoubleCommandState,
    |b| DoubleCommandState::from_u8(b),
    |s| s as u8
);

command_element!(
    /// Regulating step command (RCO).
    StepCommand,
    StepCommandState,
    |b| StepCommandState::from_u8(b),
    |s| s as u8
);

/// Qualifier of set-point command (QOS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetpointQualifier {
    /// Qualifier (QL, 0-127)
    pub ql: u8,
    /// Select (true) or execute (false)
    pub select: bool,
}

impl SetpointQualifier {
    /// Create a qualifier.
    pub fn new(ql: u8, select: bool) -> Self {
        Self {
            ql: ql & 0x7F,
            select,
        }
    }
}

impl Wire for SetpointQualifier {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(Self {
            ql: b & 0x7F,
            select: b & 0x80 != 0,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[(self.ql & 0x7F) | if self.select { 0x80 } else { 0 }]);
    }
}

sequential_element! {
    /// Set-point command, normalized value (NVA + QOS).
    SetpointNormalized {
        /// Normalized set-point
        value: NormalizedValue,
        /// Qualifier of set-point command
        qualifier: SetpointQualifier,
    }
}

sequential_element! {
    /// Set-point command, scaled value (SVA + QOS).
    SetpointScaled {
        /// Scaled set-point
        value: ScaledValue,
        /// Qualifier of set-point command
        qualifier: SetpointQualifier,
    }
}

sequential_element! {
    /// Set-point command, short floating point value (IEEE STD 754 + QOS).
    SetpointFloat {
        /// Floating point set-point
        value: f32,
        /// Qualifier of set-point command
        qualifier: SetpointQualifier,
    }
}

sequential_element! {
    /// Parameter of measured value, normalized (NVA + QPM).
    ParameterNormalized {
        /// Normalized threshold/filter value
        value: NormalizedValue,
        /// Qualifier of parameter of measured value
        qpm: u8,
    }
}

sequential_element! {
    /// Parameter of measured value, scaled (SVA + QPM).
    ParameterScaled {
        /// Scaled threshold/filter value
        value: ScaledValue,
        /// Qualifier of parameter of measured value
        qpm: u8,
    }
}

sequential_element! {
    /// Parameter of measured value, short floating point (IEEE STD 754 + QPM).
    ParameterFloat {
        /// Floating point threshold/filter value
        value: f32,
        /// Qualifier of parameter of measured value
        qpm: u8,
    }
}
