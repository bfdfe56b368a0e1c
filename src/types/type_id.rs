//! IEC 60870-5-104 Type Identification.
//!
//! Type identification defines the structure and meaning of information objects.
//! File transfer types (120..=127) are not supported and parse as unknown.

use crate::error::{Iec104Error, Result};

/// Time tag carried by every element of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTag {
    /// No time tag
    None,
    /// Three octet binary time (CP24Time2a)
    Cp24,
    /// Seven octet binary time (CP56Time2a)
    Cp56,
}

macro_rules! type_ids {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal, $name:literal, $tag:ident; )+) => {
        /// IEC 60870-5-104 Type Identification.
        ///
        /// Defines the type of information contained in an ASDU.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum TypeId {
            $( $(#[$doc])* $variant = $code, )+
        }

        impl TypeId {
            /// All supported type identifications in numeric order.
            pub const ALL: &'static [TypeId] = &[$( TypeId::$variant, )+];

            /// Create TypeId from raw byte value.
            #[inline]
            pub fn from_u8(value: u8) -> Result<Self> {
                match value {
                    $( $code => Ok(Self::$variant), )+
                    _ => Err(Iec104Error::UnknownTypeId(value)),
                }
            }

            /// Get the IEC standard name (e.g., "M_SP_NA_1").
            #[inline]
            pub const fn standard_name(&self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )+
                }
            }

            /// Time tag carried by elements of this type.
            #[inline]
            pub const fn time_tag(&self) -> TimeTag {
                match self {
                    $( Self::$variant => TimeTag::$tag, )+
                }
            }
        }
    };
}

type_ids! {
    // Process information in monitoring direction
    /// Single-point information (M_SP_NA_1)
    SinglePoint = 1, "M_SP_NA_1", None;
    /// Single-point information with time tag (M_SP_TA_1)
    SinglePointTime24 = 2, "M_SP_TA_1", Cp24;
    /// Double-point information (M_DP_NA_1)
    DoublePoint = 3, "M_DP_NA_1", None;
    /// Double-point information with time tag (M_DP_TA_1)
    DoublePointTime24 = 4, "M_DP_TA_1", Cp24;
    /// Step position information (M_ST_NA_1)
    StepPosition = 5, "M_ST_NA_1", None;
    /// Step position information with time tag (M_ST_TA_1)
    StepPositionTime24 = 6, "M_ST_TA_1", Cp24;
    /// Bitstring of 32 bit (M_BO_NA_1)
    Bitstring32 = 7, "M_BO_NA_1", None;
    /// Bitstring of 32 bit with time tag (M_BO_TA_1)
    Bitstring32Time24 = 8, "M_BO_TA_1", Cp24;
    /// Measured value, normalized (M_ME_NA_1)
    MeasuredNormalized = 9, "M_ME_NA_1", None;
    /// Measured value, normalized with time tag (M_ME_TA_1)
    MeasuredNormalizedTime24 = 10, "M_ME_TA_1", Cp24;
    /// Measured value, scaled (M_ME_NB_1)
    MeasuredScaled = 11, "M_ME_NB_1", None;
    /// Measured value, scaled with time tag (M_ME_TB_1)
    MeasuredScaledTime24 = 12, "M_ME_TB_1", Cp24;
    /// Measured value, short floating point (M_ME_NC_1)
    MeasuredFloat = 13, "M_ME_NC_1", None;
    /// Measured value, short floating point with time tag (M_ME_TC_1)
    MeasuredFloatTime24 = 14, "M_ME_TC_1", Cp24;
    /// Integrated totals (M_IT_NA_1)
    IntegratedTotals = 15, "M_IT_NA_1", None;
    /// Integrated totals with time tag (M_IT_TA_1)
    IntegratedTotalsTime24 = 16, "M_IT_TA_1", Cp24;
    /// Event of protection equipment with time tag (M_EP_TA_1)
    ProtectionEventTime24 = 17, "M_EP_TA_1", Cp24;
    /// Packed start events of protection equipment with time tag (M_EP_TB_1)
    PackedStartEventsTime24 = 18, "M_EP_TB_1", Cp24;
    /// Packed output circuit information with time tag (M_EP_TC_1)
    PackedOutputCircuitTime24 = 19, "M_EP_TC_1", Cp24;
    /// Packed single-point information with status change detection (M_PS_NA_1)
    PackedSinglePoint = 20, "M_PS_NA_1", None;
    /// Measured value, normalized without quality descriptor (M_ME_ND_1)
    MeasuredNormalizedNoQuality = 21, "M_ME_ND_1", None;
    /// Single-point information with time tag CP56Time2a (M_SP_TB_1)
    SinglePointTime56 = 30, "M_SP_TB_1", Cp56;
    /// Double-point information with time tag CP56Time2a (M_DP_TB_1)
    DoublePointTime56 = 31, "M_DP_TB_1", Cp56;
    /// Step position information with time tag CP56Time2a (M_ST_TB_1)
    StepPositionTime56 = 32, "M_ST_TB_1", Cp56;
    /// Bitstring of 32 bit with time tag CP56Time2a (M_BO_TB_1)
    Bitstring32Time56 = 33, "M_BO_TB_1", Cp56;
    /// Measured value, normalized with time tag CP56Time2a (M_ME_TD_1)
    MeasuredNormalizedTime56 = 34, "M_ME_TD_1", Cp56;
    /// Measured value, scaled with time tag CP56Time2a (M_ME_TE_1)
    MeasuredScaledTime56 = 35, "M_ME_TE_1", Cp56;
    /// Measured value, short floating point with time tag CP56Time2a (M_ME_TF_1)
    MeasuredFloatTime56 = 36, "M_ME_TF_1", Cp56;
    /// Integrated totals with time tag CP56Time2a (M_IT_TB_1)
    IntegratedTotalsTime56 = 37, "M_IT_TB_1", Cp56;
    /// Event of protection equipment with time tag CP56Time2a (M_EP_TD_1)
    ProtectionEventTime56 = 38, "M_EP_TD_1", Cp56;
    /// Packed start events of protection equipment with time tag CP56Time2a (M_EP_TE_1)
    PackedStartEventsTime56 = 39, "M_EP_TE_1", Cp56;
    /// Packed output circuit information with time tag CP56Time2a (M_EP_TF_1)
    PackedOutputCircuitTime56 = 40, "M_EP_TF_1", Cp56;

    // Process information in control direction
    /// Single command (C_SC_NA_1)
    SingleCommand = 45, "C_SC_NA_1", None;
    /// Double command (C_DC_NA_1)
    DoubleCommand = 46, "C_DC_NA_1", None;
    /// Regulating step command (C_RC_NA_1)
    RegulatingStep = 47, "C_RC_NA_1", None;
    /// Set-point command, normalized (C_SE_NA_1)
    SetpointNormalized = 48, "C_SE_NA_1", None;
    /// Set-point command, scaled (C_SE_NB_1)
    SetpointScaled = 49, "C_SE_NB_1", None;
    /// Set-point command, short floating point (C_SE_NC_1)
    SetpointFloat = 50, "C_SE_NC_1", None;
    /// Bitstring of 32 bit command (C_BO_NA_1)
    Bitstring32Command = 51, "C_BO_NA_1", None;
    /// Single command with time tag CP56Time2a (C_SC_TA_1)
    SingleCommandTime56 = 58, "C_SC_TA_1", Cp56;
    /// Double command with time tag CP56Time2a (C_DC_TA_1)
    DoubleCommandTime56 = 59, "C_DC_TA_1", Cp56;
    /// Regulating step command with time tag CP56Time2a (C_RC_TA_1)
    RegulatingStepTime56 = 60, "C_RC_TA_1", Cp56;
    /// Set-point command, normalized with time tag CP56Time2a (C_SE_TA_1)
    SetpointNormalizedTime56 = 61, "C_SE_TA_1", Cp56;
    /// Set-point command, scaled with time tag CP56Time2a (C_SE_TB_1)
    SetpointScaledTime56 = 62, "C_SE_TB_1", Cp56;
    /// Set-point command, short floating point with time tag CP56Time2a (C_SE_TC_1)
    SetpointFloatTime56 = 63, "C_SE_TC_1", Cp56;
    /// Bitstring of 32 bit command with time tag CP56Time2a (C_BO_TA_1)
    Bitstring32CommandTime56 = 64, "C_BO_TA_1", Cp56;

    // System information in monitoring direction
    /// End of initialization (M_EI_NA_1)
    EndOfInit = 70, "M_EI_NA_1", None;

    // System information in control direction
    /// Interrogation command (C_IC_NA_1)
    InterrogationCommand = 100, "C_IC_NA_1", None;
    /// Counter interrogation command (C_CI_NA_1)
    CounterInterrogation = 101, "C_CI_NA_1", None;
    /// Read command (C_RD_NA_1)
    ReadCommand = 102, "C_RD_NA_1", None;
    /// Clock synchronization command (C_CS_NA_1)
    ClockSync = 103, "C_CS_NA_1", None;
    /// Test command (C_TS_NA_1)
    TestCommand = 104, "C_TS_NA_1", None;
    /// Reset process command (C_RP_NA_1)
    ResetProcess = 105, "C_RP_NA_1", None;
    /// Delay acquisition command (C_CD_NA_1)
    DelayAcquisition = 106, "C_CD_NA_1", None;
    /// Test command with time tag CP56Time2a (C_TS_TA_1)
    TestCommandTime56 = 107, "C_TS_TA_1", Cp56;

    // Parameters in control direction
    /// Parameter of measured value, normalized (P_ME_NA_1)
    ParameterNormalized = 110, "P_ME_NA_1", None;
    /// Parameter of measured value, scaled (P_ME_NB_1)
    ParameterScaled = 111, "P_ME_NB_1", None;
    /// Parameter of measured value, short floating point (P_ME_NC_1)
    ParameterFloat = 112, "P_ME_NC_1", None;
    /// Parameter activation (P_AC_NA_1)
    ParameterActivation = 113, "P_AC_NA_1", None;
}

impl TypeId {
    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this type is in the monitoring direction (from RTU to master).
    #[inline]
    pub const fn is_monitoring(&self) -> bool {
        matches!(self.as_u8(), 1..=40 | 70)
    }

    /// Check if this type is in the control direction (from master to RTU).
    #[inline]
    pub const fn is_control(&self) -> bool {
        matches!(self.as_u8(), 45..=64 | 100..=113)
    }

    /// Check if this type contains a time tag.
    #[inline]
    pub const fn has_time_tag(&self) -> bool {
        !matches!(self.time_tag(), TimeTag::None)
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.standard_name())
    }
}
