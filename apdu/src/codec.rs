// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Hex / big-endian value helpers shared by command assembly and transports

use alloc::vec::Vec;

use crate::ApduError;

/// Decode a hex string, accepting an optional `0x` prefix
pub fn decode(s: &str) -> Result<Vec<u8>, ApduError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(ApduError::from)
}

/// Strip leading zero bytes from a big-endian value
pub fn trim_leading_zeros(b: &[u8]) -> &[u8] {
    let n = b.iter().take_while(|v| **v == 0).count();
    &b[n..]
}

/// encdec helper module for big-endian `u16` fields
pub(crate) mod be_u16 {
    use encdec::Error;

    pub fn enc(v: &u16, buff: &mut [u8]) -> Result<usize, Error> {
        if buff.len() < 2 {
            return Err(Error::Length);
        }

        buff[..2].copy_from_slice(&v.to_be_bytes());

        Ok(2)
    }

    pub fn enc_len(_v: &u16) -> Result<usize, Error> {
        Ok(2)
    }

    pub fn dec(buff: &[u8]) -> Result<(u16, usize), Error> {
        if buff.len() < 2 {
            return Err(Error::Length);
        }

        Ok((u16::from_be_bytes([buff[0], buff[1]]), 2))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_prefixed() {
        assert_eq!(decode("0x0102").unwrap(), [1, 2]);
        assert_eq!(decode("0102").unwrap(), [1, 2]);
        assert_eq!(decode("zz"), Err(ApduError::InvalidHex));
        assert_eq!(decode("+1"), Err(ApduError::InvalidHex));
    }

    #[test]
    fn big_endian_u16() {
        let mut b = [0u8; 2];
        assert_eq!(be_u16::enc(&0xbeef, &mut b).unwrap(), 2);
        assert_eq!(b, [0xbe, 0xef]);
        assert_eq!(be_u16::dec(&[0x00, 0x13, 0xff]).unwrap(), (0x0013, 2));
        assert!(be_u16::dec(&[0x00]).is_err());
    }

    #[test]
    fn trim_zeros() {
        assert_eq!(trim_leading_zeros(&[0, 0, 1, 0]), &[1, 0]);
        assert!(trim_leading_zeros(&[0, 0]).is_empty());
    }
}
