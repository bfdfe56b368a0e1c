//! IEC 60870-5-104 Cause of Transmission (COT).
//!
//! The cause of transmission defines the reason for sending an ASDU. On the
//! wire it occupies the low six bits of the first COT octet; the test and
//! negative-confirmation flags live in the upper two bits and are carried
//! separately by [`Asdu`](crate::types::Asdu).

use crate::error::{Iec104Error, Result};

macro_rules! causes {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal; )+) => {
        /// Cause of Transmission (COT).
        ///
        /// Defines the reason for transmission of an ASDU. Codes without a
        /// standard meaning are kept as [`Cot::Other`] so they can be echoed.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Cot {
            $( $(#[$doc])* $variant, )+
            /// Cause code not assigned by the standard (0, 17..=19, 42, 43, 48..=63)
            Other(u8),
        }

        impl Cot {
            /// Create COT from raw byte value (lower 6 bits), rejecting
            /// codes without a standard meaning.
            #[inline]
            pub fn from_u8(value: u8) -> Result<Self> {
                match Self::from_raw(value) {
                    Self::Other(other) => Err(Iec104Error::UnknownCot(other)),
                    cot => Ok(cot),
                }
            }

            /// Create COT from raw byte value (lower 6 bits). Never fails.
            #[inline]
            pub const fn from_raw(value: u8) -> Self {
                match value & 0x3F {
                    $( $code => Self::$variant, )+
                    other => Self::Other(other),
                }
            }

            /// Convert to raw byte value.
            #[inline]
            pub const fn as_u8(self) -> u8 {
                match self {
                    $( Self::$variant => $code, )+
                    Self::Other(code) => code & 0x3F,
                }
            }
        }

        impl std::fmt::Display for Cot {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $( Self::$variant => f.write_str(stringify!($variant)), )+
                    Self::Other(code) => write!(f, "Other({})", code),
                }
            }
        }
    };
}

causes! {
    /// Periodic, cyclic (1)
    Periodic = 1;
    /// Background scan (2)
    Background = 2;
    /// Spontaneous (3)
    Spontaneous = 3;
    /// Initialized (4)
    Initialized = 4;
    /// Request or requested (5)
    Request = 5;
    /// Activation (6)
    Activation = 6;
    /// Activation confirmation (7)
    ActivationConfirm = 7;
    /// Deactivation (8)
    Deactivation = 8;
    /// Deactivation confirmation (9)
    DeactivationConfirm = 9;
    /// Activation termination (10)
    ActivationTermination = 10;
    /// Return information caused by a remote command (11)
    ReturnRemoteCommand = 11;
    /// Return information caused by a local command (12)
    ReturnLocalCommand = 12;
    /// File transfer (13)
    FileTransfer = 13;
    /// Authentication (14)
    Authentication = 14;
    /// Maintenance of authentication session key (15)
    MaintenanceOfAuthSessionKey = 15;
    /// Maintenance of user role and update key (16)
    MaintenanceOfUserRoleAndUpdateKey = 16;
    /// Interrogated by station interrogation (20)
    InterrogatedByStation = 20;
    /// Interrogated by group 1 interrogation (21)
    InterrogatedByGroup1 = 21;
    /// Interrogated by group 2 interrogation (22)
    InterrogatedByGroup2 = 22;
    /// Interrogated by group 3 interrogation (23)
    InterrogatedByGroup3 = 23;
    /// Interrogated by group 4 interrogation (24)
    InterrogatedByGroup4 = 24;
    /// Interrogated by group 5 interrogation (25)
    InterrogatedByGroup5 = 25;
    /// Interrogated by group 6 interrogation (26)
    InterrogatedByGroup6 = 26;
    /// Interrogated by group 7 interrogation (27)
    InterrogatedByGroup7 = 27;
    /// Interrogated by group 8 interrogation (28)
    InterrogatedByGroup8 = 28;
    /// Interrogated by group 9 interrogation (29)
    InterrogatedByGroup9 = 29;
    /// Interrogated by group 10 interrogation (30)
    InterrogatedByGroup10 = 30;
    /// Interrogated by group 11 interrogation (31)
    InterrogatedByGroup11 = 31;
    /// Interrogated by group 12 interrogation (32)
    InterrogatedByGroup12 = 32;
    /// Interrogated by group 13 interrogation (33)
    InterrogatedByGroup13 = 33;
    /// Interrogated by group 14 interrogation (34)
    InterrogatedByGroup14 = 34;
    /// Interrogated by group 15 interrogation (35)
    InterrogatedByGroup15 = 35;
    /// Interrogated by group 16 interrogation (36)
    InterrogatedByGroup16 = 36;
    /// Requested by general counter request (37)
    RequestedByGeneralCounter = 37;
    /// Requested by group 1 counter request (38)
    RequestedByGroup1Counter = 38;
    /// Requested by group 2 counter request (39)
    RequestedByGroup2Counter = 39;
    /// Requested by group 3 counter request (40)
    RequestedByGroup3Counter = 40;
    /// Requested by group 4 counter request (41)
    RequestedByGroup4Counter = 41;
    /// Unknown type identification (44)
    UnknownTypeId = 44;
    /// Unknown cause of transmission (45)
    UnknownCot = 45;
    /// Unknown common address of ASDU (46)
    UnknownCommonAddress = 46;
    /// Unknown information object address (47)
    UnknownIoa = 47;
}

impl Cot {
    /// Whether the code has a standard meaning.
    #[inline]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Check if this is a positive confirmation.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        matches!(
            self,
            Self::ActivationConfirm | Self::DeactivationConfirm | Self::ActivationTermination
        )
    }

    /// Check if this is one of the "unknown ..." causes used for negative responses.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        matches!(
            self,
            Self::UnknownTypeId | Self::UnknownCot | Self::UnknownCommonAddress | Self::UnknownIoa
        )
    }

    /// Check if this COT indicates an interrogation response.
    #[inline]
    pub const fn is_interrogation_response(&self) -> bool {
        matches!(self.as_u8(), 20..=36)
    }

    /// Check if this COT indicates a counter request response.
    #[inline]
    pub const fn is_counter_response(&self) -> bool {
        matches!(self.as_u8(), 37..=41)
    }
}
