//! Fixed-width wire encoding shared by all information element codecs.

use bytes::BytesMut;

use crate::error::{Iec104Error, Result};

/// A value with a fixed-size binary representation.
pub(crate) trait Wire: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decode from the start of `buf`.
    fn decode(buf: &[u8]) -> Result<Self>;

    /// Append the encoded form to `buf`.
    fn encode(&self, buf: &mut BytesMut);
}

/// Copy the first `N` bytes of `buf` or fail with a parsing error.
#[inline]
pub(crate) fn read<const N: usize>(buf: &[u8]) -> Result<[u8; N]> {
    buf.get(..N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| {
            Iec104Error::parsing(format!("need {} bytes, got {}", N, buf.len()))
        })
}

/// Decode two consecutive values.
#[inline]
pub(crate) fn pair<A: Wire, B: Wire>(buf: &[u8]) -> Result<(A, B)> {
    let a = A::decode(buf)?;
    let b = B::decode(&buf[A::SIZE..])?;
    Ok((a, b))
}

impl Wire for u8 {
    const SIZE: usize = 1;

    fn decode(buf: &[u8]) -> Result<Self> {
        let [b] = read::<1>(buf)?;
        Ok(b)
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[*self]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_exact_and_short() {
        assert_eq!(read::<2>(&[1, 2, 3]).unwrap(), [1, 2]);
        assert!(matches!(read::<4>(&[1, 2, 3]), Err(Iec104Error::Parsing(_))));
    }

    #[test]
    fn test_pair() {
        let (a, b): (u8, u8) = pair(&[7, 9]).unwrap();
        assert_eq!((a, b), (7, 9));
        assert!(pair::<u8, u8>(&[7]).is_err());
    }
}
