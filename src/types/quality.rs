//! Quality descriptors.

use bytes::BytesMut;

use super::wire::{read, Wire};
use crate::error::Result;

/// Quality descriptor (QDS).
///
/// Used standalone after measured values and bitstrings, and in the upper
/// nibble of SIQ/DIQ where bit 0 belongs to the value instead of `overflow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityDescriptor {
    /// Overflow (OV)
    pub overflow: bool,
    /// Blocked (BL)
    pub blocked: bool,
    /// Substituted (SB)
    pub substituted: bool,
    /// Not topical (NT)
    pub not_topical: bool,
    /// Invalid (IV)
    pub invalid: bool,
}

impl QualityDescriptor {
    /// Create a new quality descriptor with all flags false.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a quality descriptor indicating invalid data.
    pub fn invalid() -> Self {
        Self {
            invalid: true,
            ..Default::default()
        }
    }

    /// Parse from QDS byte.
    pub fn from_u8(value: u8) -> Self {
        Self {
            overflow: (value & 0x01) != 0,
            blocked: (value & 0x10) != 0,
            substituted: (value & 0x20) != 0,
            not_topical: (value & 0x40) != 0,
            invalid: (value & 0x80) != 0,
        }
    }

    /// Parse the quality bits of an SIQ/DIQ byte.
    pub fn from_siq(value: u8) -> Self {
        Self::from_u8(value & 0xF0)
    }

    /// Encode to QDS byte.
    pub fn as_u8(&self) -> u8 {
        self.to_siq() | if self.overflow { 0x01 } else { 0 }
    }

    /// Encode the quality bits of an SIQ/DIQ byte (without value bits).
    pub fn to_siq(&self) -> u8 {
        let mut result = 0u8;
        if self.blocked {
            result |= 0x10;
        }
        if self.substituted {
            result |= 0x20;
        }
        if self.not_topical {
            result |= 0x40;
        }
        if self.invalid {
            result |= 0x80;
        }
        result
    }

    /// Check if the quality is good (all flags false).
    pub fn is_good(&self) -> bool {
        self.as_u8() == 0
    }
}

impl Wire for QualityDescriptor {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(Self::from_u8(b))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.as_u8()]);
    }
}

/// Quality descriptor for events of protection equipment (QDP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityDescriptorP {
    /// Reserved bit (RES)
    pub reserved: bool,
    /// Elapsed time invalid (EI)
    pub elapsed_time_invalid: bool,
    /// Blocked (BL)
    pub blocked: bool,
    /// Substituted (SB)
    pub substituted: bool,
    /// Not topical (NT)
    pub not_topical: bool,
    /// Invalid (IV)
    pub invalid: bool,
}

impl QualityDescriptorP {
    /// Parse from QDP byte.
    pub fn from_u8(value: u8) -> Self {
        Self {
            reserved: (value & 0x04) != 0,
            elapsed_time_invalid: (value & 0x08) != 0,
            blocked: (value & 0x10) != 0,
            substituted: (value & 0x20) != 0,
            not_topical: (value & 0x40) != 0,
            invalid: (value & 0x80) != 0,
        }
    }

    /// Encode to QDP byte.
    pub fn as_u8(&self) -> u8 {
        let flags: [(bool, u8); 6] = [
            (self.reserved, 0x04),
            (self.elapsed_time_invalid, 0x08),
            (self.blocked, 0x10),
            (self.substituted, 0x20),
            (self.not_topical, 0x40),
            (self.invalid, 0x80),
        ];
        flags
            .iter()
            .filter(|(set, _)| *set)
            .fold(0u8, |acc, (_, bit)| acc | bit)
    }
}

impl Wire for QualityDescriptorP {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(Self::from_u8(b))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.as_u8()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_descriptor_bits() {
        let q = QualityDescriptor::from_u8(0xF1);
        assert!(q.overflow);
        assert!(q.blocked);
        assert!(q.substituted);
        assert!(q.not_topical);
        assert!(q.invalid);
        assert_eq!(q.as_u8(), 0xF1);
        assert!(!q.is_good());

        assert!(QualityDescriptor::new().is_good());
        assert_eq!(QualityDescriptor::invalid().as_u8(), 0x80);
    }

    #[test]
    fn test_quality_descriptor_siq() {
        // bit 0 of SIQ is the value, not overflow
        let q = QualityDescriptor::from_siq(0x91);
        assert!(!q.overflow);
        assert!(q.blocked);
        assert!(q.invalid);
        assert_eq!(q.to_siq(), 0x90);
    }

    #[test]
    fn test_quality_descriptor_p() {
        let q = QualityDescriptorP::from_u8(0x8C);
        assert!(q.reserved);
        assert!(q.elapsed_time_invalid);
        assert!(q.invalid);
        assert!(!q.blocked);
        assert_eq!(q.as_u8(), 0x8C);

        // low two bits are not part of QDP
        assert_eq!(QualityDescriptorP::from_u8(0x03).as_u8(), 0);
    }
}
