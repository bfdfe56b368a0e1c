//! Information objects and the per-type element catalog.
//!
//! An information object is an address (IOA) followed by the fixed-width
//! element of the ASDU's type. The catalog maps each type identification to
//! its element size, whether it may be packed as a sequence (SQ=1), and
//! the decoder for its element.

use bytes::{BufMut, BytesMut};

use super::elements::*;
use super::time::{Cp16Time2a, Cp24Time2a, Cp56Time2a};
use super::type_id::TypeId;
use super::values::{BinaryCounterReading, NormalizedValue};
use super::wire::Wire;
use crate::error::{Iec104Error, Result};
use crate::parameters::ConnectionParameters;

/// Catalog entry describing the element of one type identification.
#[derive(Clone, Copy)]
pub struct CatalogEntry {
    /// Type identification
    pub type_id: TypeId,
    /// Element size in bytes, without the object address
    pub size: usize,
    /// Whether elements of this type may be packed as a sequence
    pub supports_sequence: bool,
    decode: fn(&[u8]) -> Result<InformationElement>,
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("type_id", &self.type_id)
            .field("size", &self.size)
            .field("supports_sequence", &self.supports_sequence)
            .finish()
    }
}

macro_rules! information_elements {
    ($(
        $(#[$doc:meta])*
        $variant:ident $( ( $f1:ident : $t1:ty $(, $f2:ident : $t2:ty )? ) )? => $type_id:ident, $seq:literal;
    )+) => {
        /// Element of an information object, one variant per type identification.
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub enum InformationElement {
            $( $(#[$doc])* $variant $( ( $t1 $(, $t2 )? ) )?, )+
        }

        impl InformationElement {
            /// Type identification of this element.
            pub const fn type_id(&self) -> TypeId {
                match self {
                    $( Self::$variant { .. } => TypeId::$type_id, )+
                }
            }

            /// Encoded size in bytes, without the object address.
            pub const fn size(&self) -> usize {
                match self {
                    $( Self::$variant { .. } => 0 $( + <$t1 as Wire>::SIZE $( + <$t2 as Wire>::SIZE )? )?, )+
                }
            }

            /// Whether elements of this type may be packed as a sequence.
            pub const fn supports_sequence(&self) -> bool {
                match self {
                    $( Self::$variant { .. } => $seq, )+
                }
            }

            fn encode_value(&self, buf: &mut BytesMut) {
                match self {
                    $( Self::$variant $( ( $f1 $(, $f2 )? ) )? => {
                        $( $f1.encode(buf); $( $f2.encode(buf); )? )?
                    } )+
                }
            }
        }

        #[allow(unused_variables)]
        static CATALOG: &[CatalogEntry] = &[
            $(
                CatalogEntry {
                    type_id: TypeId::$type_id,
                    size: 0 $( + <$t1 as Wire>::SIZE $( + <$t2 as Wire>::SIZE )? )?,
                    supports_sequence: $seq,
                    decode: |buf: &[u8]| {
                        $(
                            let $f1 = <$t1 as Wire>::decode(buf)?;
                            $( let $f2 = <$t2 as Wire>::decode(&buf[<$t1 as Wire>::SIZE..])?; )?
                        )?
                        Ok(InformationElement::$variant $( ( $f1 $(, $f2 )? ) )?)
                    },
                },
            )+
        ];
    };
}

information_elements! {
    /// Single-point information (M_SP_NA_1)
    SinglePoint(value: SinglePointInformation) => SinglePoint, true;
    /// Single-point information with CP24Time2a (M_SP_TA_1)
    SinglePointCp24(value: SinglePointInformation, time: Cp24Time2a) => SinglePointTime24, false;
    /// Double-point information (M_DP_NA_1)
    DoublePoint(value: DoublePointInformation) => DoublePoint, true;
    /// Double-point information with CP24Time2a (M_DP_TA_1)
    DoublePointCp24(value: DoublePointInformation, time: Cp24Time2a) => DoublePointTime24, false;
    /// Step position information (M_ST_NA_1)
    StepPosition(value: StepPositionInformation) => StepPosition, true;
    /// Step position information with CP24Time2a (M_ST_TA_1)
    StepPositionCp24(value: StepPositionInformation, time: Cp24Time2a) => StepPositionTime24, false;
    /// Bitstring of 32 bit (M_BO_NA_1)
    Bitstring32(value: Bitstring32Information) => Bitstring32, true;
    /// Bitstring of 32 bit with CP24Time2a (M_BO_TA_1)
    Bitstring32Cp24(value: Bitstring32Information, time: Cp24Time2a) => Bitstring32Time24, false;
    /// Measured value, normalized (M_ME_NA_1)
    MeasuredNormalized(value: MeasuredNormalized) => MeasuredNormalized, true;
    /// Measured value, normalized with CP24Time2a (M_ME_TA_1)
    MeasuredNormalizedCp24(value: MeasuredNormalized, time: Cp24Time2a) => MeasuredNormalizedTime24, false;
    /// Measured value, scaled (M_ME_NB_1)
    MeasuredScaled(value: MeasuredScaled) => MeasuredScaled, true;
    /// Measured value, scaled with CP24Time2a (M_ME_TB_1)
    MeasuredScaledCp24(value: MeasuredScaled, time: Cp24Time2a) => MeasuredScaledTime24, false;
    /// Measured value, short floating point (M_ME_NC_1)
    MeasuredFloat(value: MeasuredFloat) => MeasuredFloat, true;
    /// Measured value, short floating point with CP24Time2a (M_ME_TC_1)
    MeasuredFloatCp24(value: MeasuredFloat, time: Cp24Time2a) => MeasuredFloatTime24, false;
    /// Integrated totals (M_IT_NA_1)
    IntegratedTotals(value: BinaryCounterReading) => IntegratedTotals, true;
    /// Integrated totals with CP24Time2a (M_IT_TA_1)
    IntegratedTotalsCp24(value: BinaryCounterReading, time: Cp24Time2a) => IntegratedTotalsTime24, true;
    /// Event of protection equipment with CP24Time2a (M_EP_TA_1)
    ProtectionEventCp24(value: ProtectionEvent, time: Cp24Time2a) => ProtectionEventTime24, false;
    /// Packed start events of protection equipment with CP24Time2a (M_EP_TB_1)
    PackedStartEventsCp24(value: PackedStartEvents, time: Cp24Time2a) => PackedStartEventsTime24, true;
    /// Packed output circuit information with CP24Time2a (M_EP_TC_1)
    PackedOutputCircuitCp24(value: PackedOutputCircuitInfo, time: Cp24Time2a) => PackedOutputCircuitTime24, false;
    /// Packed single-point information with status change detection (M_PS_NA_1)
    PackedSinglePoint(value: PackedSinglePointWithScd) => PackedSinglePoint, true;
    /// Measured value, normalized without quality descriptor (M_ME_ND_1)
    MeasuredNormalizedNoQuality(value: NormalizedValue) => MeasuredNormalizedNoQuality, false;
    /// Single-point information with CP56Time2a (M_SP_TB_1)
    SinglePointCp56(value: SinglePointInformation, time: Cp56Time2a) => SinglePointTime56, false;
    /// Double-point information with CP56Time2a (M_DP_TB_1)
    DoublePointCp56(value: DoublePointInformation, time: Cp56Time2a) => DoublePointTime56, false;
    /// Step position information with CP56Time2a (M_ST_TB_1)
    StepPositionCp56(value: StepPositionInformation, time: Cp56Time2a) => StepPositionTime56, false;
    /// Bitstring of 32 bit with CP56Time2a (M_BO_TB_1)
    Bitstring32Cp56(value: Bitstring32Information, time: Cp56Time2a) => Bitstring32Time56, false;
    /// Measured value, normalized with CP56Time2a (M_ME_TD_1)
    MeasuredNormalizedCp56(value: MeasuredNormalized, time: Cp56Time2a) => MeasuredNormalizedTime56, false;
    /// Measured value, scaled with CP56Time2a (M_ME_TE_1)
    MeasuredScaledCp56(value: MeasuredScaled, time: Cp56Time2a) => MeasuredScaledTime56, false;
    /// Measured value, short floating point with CP56Time2a (M_ME_TF_1)
    MeasuredFloatCp56(value: MeasuredFloat, time: Cp56Time2a) => MeasuredFloatTime56, false;
    /// Integrated totals with CP56Time2a (M_IT_TB_1)
    IntegratedTotalsCp56(value: BinaryCounterReading, time: Cp56Time2a) => IntegratedTotalsTime56, true;
    /// Event of protection equipment with CP56Time2a (M_EP_TD_1)
    ProtectionEventCp56(value: ProtectionEvent, time: Cp56Time2a) => ProtectionEventTime56, false;
    /// Packed start events of protection equipment with CP56Time2a (M_EP_TE_1)
    PackedStartEventsCp56(value: PackedStartEvents, time: Cp56Time2a) => PackedStartEventsTime56, true;
    /// Packed output circuit information with CP56Time2a (M_EP_TF_1)
    PackedOutputCircuitCp56(value: PackedOutputCircuitInfo, time: Cp56Time2a) => PackedOutputCircuitTime56, false;

    /// Single command (C_SC_NA_1)
    SingleCommand(value: SingleCommand) => SingleCommand, false;
    /// Double command (C_DC_NA_1)
    DoubleCommand(value: DoubleCommand) => DoubleCommand, false;
    /// Regulating step command (C_RC_NA_1)
    StepCommand(value: StepCommand) => RegulatingStep, false;
    /// Set-point command, normalized (C_SE_NA_1)
    SetpointNormalized(value: SetpointNormalized) => SetpointNormalized, false;
    /// Set-point command, scaled (C_SE_NB_1)
    SetpointScaled(value: SetpointScaled) => SetpointScaled, false;
    /// Set-point command, short floating point (C_SE_NC_1)
    SetpointFloat(value: SetpointFloat) => SetpointFloat, false;
    /// Bitstring of 32 bit command (C_BO_NA_1)
    Bitstring32Command(value: u32) => Bitstring32Command, false;
    /// Single command with CP56Time2a (C_SC_TA_1)
    SingleCommandCp56(value: SingleCommand, time: Cp56Time2a) => SingleCommandTime56, false;
    /// Double command with CP56Time2a (C_DC_TA_1)
    DoubleCommandCp56(value: DoubleCommand, time: Cp56Time2a) => DoubleCommandTime56, false;
    /// Regulating step command with CP56Time2a (C_RC_TA_1)
    StepCommandCp56(value: StepCommand, time: Cp56Time2a) => RegulatingStepTime56, false;
    /// Set-point command, normalized with CP56Time2a (C_SE_TA_1)
    SetpointNormalizedCp56(value: SetpointNormalized, time: Cp56Time2a) => SetpointNormalizedTime56, false;
    /// Set-point command, scaled with CP56Time2a (C_SE_TB_1)
    SetpointScaledCp56(value: SetpointScaled, time: Cp56Time2a) => SetpointScaledTime56, false;
    /// Set-point command, short floating point with CP56Time2a (C_SE_TC_1)
    SetpointFloatCp56(value: SetpointFloat, time: Cp56Time2a) => SetpointFloatTime56, false;
    /// Bitstring of 32 bit command with CP56Time2a (C_BO_TA_1)
    Bitstring32CommandCp56(value: u32, time: Cp56Time2a) => Bitstring32CommandTime56, false;

    /// End of initialization, cause of initialization (M_EI_NA_1)
    EndOfInitialization(coi: u8) => EndOfInit, false;

    /// Interrogation command, qualifier of interrogation (C_IC_NA_1)
    Interrogation(qoi: u8) => InterrogationCommand, false;
    /// Counter interrogation command, qualifier of counter interrogation (C_CI_NA_1)
    CounterInterrogation(qcc: u8) => CounterInterrogation, false;
    /// Read command (C_RD_NA_1)
    Read => ReadCommand, false;
    /// Clock synchronization command (C_CS_NA_1)
    ClockSync(time: Cp56Time2a) => ClockSync, false;
    /// Test command, fixed test bit pattern (C_TS_NA_1)
    Test(pattern: u16) => TestCommand, false;
    /// Reset process command, qualifier of reset process (C_RP_NA_1)
    ResetProcess(qrp: u8) => ResetProcess, false;
    /// Delay acquisition command (C_CD_NA_1)
    DelayAcquisition(delay: Cp16Time2a) => DelayAcquisition, false;
    /// Test command with test sequence counter and CP56Time2a (C_TS_TA_1)
    TestWithTime(counter: u16, time: Cp56Time2a) => TestCommandTime56, false;

    /// Parameter of measured value, normalized (P_ME_NA_1)
    ParameterNormalized(value: ParameterNormalized) => ParameterNormalized, false;
    /// Parameter of measured value, scaled (P_ME_NB_1)
    ParameterScaled(value: ParameterScaled) => ParameterScaled, false;
    /// Parameter of measured value, short floating point (P_ME_NC_1)
    ParameterFloat(value: ParameterFloat) => ParameterFloat, false;
    /// Parameter activation, qualifier of parameter activation (P_AC_NA_1)
    ParameterActivation(qpa: u8) => ParameterActivation, false;
}

/// Look up the catalog entry of a type identification.
pub fn catalog_entry(type_id: TypeId) -> Result<&'static CatalogEntry> {
    CATALOG
        .iter()
        .find(|entry| entry.type_id == type_id)
        .ok_or(Iec104Error::UnknownTypeId(type_id.as_u8()))
}

/// Read a little-endian information object address of the configured size.
pub(crate) fn read_address(params: &ConnectionParameters, buf: &[u8]) -> Result<u32> {
    let bytes = buf.get(..params.size_of_ioa).ok_or_else(|| {
        Iec104Error::parsing(format!(
            "need {} bytes for object address, got {}",
            params.size_of_ioa,
            buf.len()
        ))
    })?;
    Ok(bytes
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

/// Write a little-endian information object address of the configured size.
/// Octets beyond the fourth are zero.
pub(crate) fn write_address(params: &ConnectionParameters, address: u32, buf: &mut BytesMut) {
    let width = params.size_of_ioa.min(4);
    buf.extend_from_slice(&address.to_le_bytes()[..width]);
    buf.put_bytes(0, params.size_of_ioa - width);
}

/// Information object: address plus element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InformationObject {
    /// Information object address (IOA)
    pub address: u32,
    /// Element value
    pub element: InformationElement,
}

impl InformationObject {
    /// Create a new information object.
    pub fn new(address: u32, element: InformationElement) -> Self {
        Self { address, element }
    }

    /// Type identification of the element.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.element.type_id()
    }

    /// Whether the element may be packed into a sequence ASDU.
    #[inline]
    pub fn supports_sequence(&self) -> bool {
        self.element.supports_sequence()
    }

    /// Bytes this object occupies in an ASDU payload.
    ///
    /// Non-first elements of a sequence ASDU carry no address.
    pub fn encoded_size(&self, params: &ConnectionParameters, with_address: bool) -> usize {
        self.element.size() + if with_address { params.size_of_ioa } else { 0 }
    }

    /// Decode an object of `type_id` from the start of `buf`.
    ///
    /// `sequence_address` is the address of a non-first sequence element,
    /// which is not present in `buf`.
    pub fn decode(
        type_id: TypeId,
        params: &ConnectionParameters,
        buf: &[u8],
        sequence_address: Option<u32>,
    ) -> Result<Self> {
        let entry = catalog_entry(type_id)?;
        let (address, value) = match sequence_address {
            Some(address) => (address, buf),
            None => (read_address(params, buf)?, &buf[params.size_of_ioa..]),
        };
        if value.len() < entry.size {
            return Err(Iec104Error::parsing(format!(
                "{} element needs {} bytes, got {}",
                type_id.standard_name(),
                entry.size,
                value.len()
            )));
        }
        Ok(Self {
            address,
            element: (entry.decode)(value)?,
        })
    }

    /// Append the encoded object to `buf`, with or without its address.
    pub fn encode(&self, params: &ConnectionParameters, buf: &mut BytesMut, with_address: bool) {
        if with_address {
            write_address(params, self.address, buf);
        }
        self.element.encode_value(buf);
    }
}
