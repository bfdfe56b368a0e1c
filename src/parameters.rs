//! Connection parameters shared by master and slave connections.
//!
//! The parameters hold the APCI window/timeout settings together with the
//! field widths of the application layer. Every connection takes its own copy
//! when it is created, so later changes never leak into running connections.

use std::time::Duration;

use crate::error::{Iec104Error, Result};

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Default IEC 104 port when running over TLS.
pub const DEFAULT_TLS_PORT: u16 = 19998;

/// Default T0 timeout (connection establishment) in seconds.
pub const DEFAULT_T0_TIMEOUT: u64 = 10;

/// Default T1 timeout (send or test confirmation) in seconds.
pub const DEFAULT_T1_TIMEOUT: u64 = 15;

/// Default T2 timeout (acknowledge in case of no data) in seconds.
pub const DEFAULT_T2_TIMEOUT: u64 = 10;

/// Default T3 timeout (test frame on idle) in seconds.
pub const DEFAULT_T3_TIMEOUT: u64 = 20;

/// Default K parameter (max unconfirmed I-frames).
pub const DEFAULT_K: u16 = 12;

/// Default W parameter (max unconfirmed receives before sending S-frame).
pub const DEFAULT_W: u16 = 8;

/// Per-connection protocol parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParameters {
    /// K parameter: max unconfirmed I-frames
    pub k: u16,
    /// W parameter: acknowledge after more than `w` received I-frames
    pub w: u16,
    /// T0: connection establishment timeout
    pub t0: Duration,
    /// T1: timeout for send or test confirmations
    pub t1: Duration,
    /// T2: acknowledgement timeout when no data is sent
    pub t2: Duration,
    /// T3: idle time before a test frame is sent
    pub t3: Duration,
    /// Size of the type identification field (always 1)
    pub size_of_type_id: usize,
    /// Size of the variable structure qualifier (always 1)
    pub size_of_vsq: usize,
    /// Size of the cause of transmission field (1 or 2)
    pub size_of_cot: usize,
    /// Originator address, sent when `size_of_cot` is 2
    pub originator_address: u8,
    /// Size of the common address (1 or 2)
    pub size_of_ca: usize,
    /// Size of the information object address (1, 2 or 3)
    pub size_of_ioa: usize,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            w: DEFAULT_W,
            t0: Duration::from_secs(DEFAULT_T0_TIMEOUT),
            t1: Duration::from_secs(DEFAULT_T1_TIMEOUT),
            t2: Duration::from_secs(DEFAULT_T2_TIMEOUT),
            t3: Duration::from_secs(DEFAULT_T3_TIMEOUT),
            size_of_type_id: 1,
            size_of_vsq: 1,
            size_of_cot: 2,
            originator_address: 0,
            size_of_ca: 2,
            size_of_ioa: 3,
        }
    }
}

impl ConnectionParameters {
    /// Create parameters with the protocol defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set K parameter.
    pub fn k(mut self, k: u16) -> Self {
        self.k = k;
        self
    }

    /// Set W parameter.
    pub fn w(mut self, w: u16) -> Self {
        self.w = w;
        self
    }

    /// Set T0 timeout.
    pub fn t0(mut self, timeout: Duration) -> Self {
        self.t0 = timeout;
        self
    }

    /// Set T1 timeout.
    pub fn t1(mut self, timeout: Duration) -> Self {
        self.t1 = timeout;
        self
    }

    /// Set T2 timeout.
    pub fn t2(mut self, timeout: Duration) -> Self {
        self.t2 = timeout;
        self
    }

    /// Set T3 timeout.
    pub fn t3(mut self, timeout: Duration) -> Self {
        self.t3 = timeout;
        self
    }

    /// Set the size of the cause of transmission field.
    pub fn size_of_cot(mut self, size: usize) -> Self {
        self.size_of_cot = size;
        self
    }

    /// Set the originator address.
    pub fn originator_address(mut self, address: u8) -> Self {
        self.originator_address = address;
        self
    }

    /// Set the size of the common address.
    pub fn size_of_ca(mut self, size: usize) -> Self {
        self.size_of_ca = size;
        self
    }

    /// Set the size of the information object address.
    pub fn size_of_ioa(mut self, size: usize) -> Self {
        self.size_of_ioa = size;
        self
    }

    /// Size of the data unit identifier (type id, VSQ, COT and CA).
    #[inline]
    pub fn header_size(&self) -> usize {
        self.size_of_type_id + self.size_of_vsq + self.size_of_cot + self.size_of_ca
    }

    /// Largest information object address that fits the configured IOA size.
    #[inline]
    pub fn max_ioa(&self) -> u32 {
        match self.size_of_ioa {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0xFF_FFFF,
        }
    }

    /// Check that the parameters describe a valid connection.
    pub fn validate(&self) -> Result<()> {
        if self.size_of_type_id != 1 || self.size_of_vsq != 1 {
            return Err(Iec104Error::config(
                "type identification and VSQ must be one byte",
            ));
        }
        if !matches!(self.size_of_cot, 1 | 2) {
            return Err(Iec104Error::config(format!(
                "size of COT must be 1 or 2, got {}",
                self.size_of_cot
            )));
        }
        if !matches!(self.size_of_ca, 1 | 2) {
            return Err(Iec104Error::config(format!(
                "size of CA must be 1 or 2, got {}",
                self.size_of_ca
            )));
        }
        if !(1..=3).contains(&self.size_of_ioa) {
            return Err(Iec104Error::config(format!(
                "size of IOA must be 1, 2 or 3, got {}",
                self.size_of_ioa
            )));
        }
        if self.k == 0 || self.w == 0 {
            return Err(Iec104Error::config("k and w must be greater than zero"));
        }
        if self.k > 32767 {
            return Err(Iec104Error::config("k must not exceed 32767"));
        }
        if self.t1.is_zero() || self.t2.is_zero() || self.t3.is_zero() {
            return Err(Iec104Error::config("timeouts must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = ConnectionParameters::default();
        assert_eq!(params.k, 12);
        assert_eq!(params.w, 8);
        assert_eq!(params.t0, Duration::from_secs(10));
        assert_eq!(params.t1, Duration::from_secs(15));
        assert_eq!(params.t2, Duration::from_secs(10));
        assert_eq!(params.t3, Duration::from_secs(20));
        assert_eq!(params.size_of_cot, 2);
        assert_eq!(params.size_of_ca, 2);
        assert_eq!(params.size_of_ioa, 3);
        assert_eq!(params.originator_address, 0);
        assert_eq!(params.header_size(), 6);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let params = ConnectionParameters::new()
            .k(20)
            .w(10)
            .t1(Duration::from_secs(5))
            .size_of_cot(1)
            .size_of_ca(1)
            .size_of_ioa(2);

        assert_eq!(params.k, 20);
        assert_eq!(params.w, 10);
        assert_eq!(params.t1, Duration::from_secs(5));
        assert_eq!(params.header_size(), 4);
        assert_eq!(params.max_ioa(), 0xFFFF);
    }

    #[test]
    fn test_copies_are_independent() {
        let original = ConnectionParameters::default();
        let mut copy = original;
        copy.size_of_ioa = 1;
        assert_eq!(original.size_of_ioa, 3);
    }

    #[test]
    fn test_validate_rejects_bad_widths() {
        assert!(ConnectionParameters::new().size_of_cot(3).validate().is_err());
        assert!(ConnectionParameters::new().size_of_ca(0).validate().is_err());
        assert!(ConnectionParameters::new().size_of_ioa(4).validate().is_err());
        assert!(ConnectionParameters::new().k(0).validate().is_err());
        assert!(ConnectionParameters::new()
            .t1(Duration::ZERO)
            .validate()
            .is_err());
    }
}
