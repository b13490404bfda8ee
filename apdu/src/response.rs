// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Device reply parsing
//!
//! Reassembled replies carry output data followed by a two-byte status word.

use alloc::{vec, vec::Vec};

use encdec::{DecodeOwned, Encode};

use crate::{codec, ApduError};

/// Secure element status word
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const SUCCESS: Self = Self(0x9000);
    pub const WRONG_LENGTH: Self = Self(0x6700);
    pub const SECURITY_NOT_SATISFIED: Self = Self(0x6982);
    pub const CONDITIONS_NOT_SATISFIED: Self = Self(0x6985);
    pub const WRONG_DATA: Self = Self(0x6a80);
    pub const WRONG_P1P2: Self = Self(0x6a86);
    pub const INS_NOT_SUPPORTED: Self = Self(0x6d00);
    pub const CLA_NOT_SUPPORTED: Self = Self(0x6e00);
    pub const CANCELED_BY_USER: Self = Self(0x6645);

    /// Check whether the status indicates success
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    /// Short description for known status words
    pub fn description(&self) -> &'static str {
        match *self {
            Self::SUCCESS => "success",
            Self::WRONG_LENGTH => "wrong length",
            Self::SECURITY_NOT_SATISFIED => "security status not satisfied",
            Self::CONDITIONS_NOT_SATISFIED => "conditions of use not satisfied",
            Self::WRONG_DATA => "incorrect data",
            Self::WRONG_P1P2 => "incorrect P1 / P2",
            Self::INS_NOT_SUPPORTED => "instruction not supported",
            Self::CLA_NOT_SUPPORTED => "class not supported",
            Self::CANCELED_BY_USER => "canceled by user",
            _ => "unknown status",
        }
    }
}

impl core::fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl core::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04x} ({})", self.0, self.description())
    }
}

/// Parsed device reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Output data
    pub data: Vec<u8>,
    /// Trailing status word
    pub status: StatusWord,
}

impl Response {
    /// Split a reply into output data and status word
    pub fn parse(b: &[u8]) -> Result<Self, ApduError> {
        Self::decode_owned(b).map(|(r, _n)| r)
    }

    /// Parse a hex-encoded reply
    pub fn from_hex(s: &str) -> Result<Self, ApduError> {
        Self::parse(&codec::decode(s)?)
    }

    /// Encode reply bytes (data followed by status word)
    pub fn to_vec(&self) -> Result<Vec<u8>, ApduError> {
        let mut b = vec![0u8; self.encode_len()?];
        self.encode(&mut b)?;

        Ok(b)
    }
}

impl Encode for Response {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.data.len() + 2)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        let (data, sw) = buff[..n].split_at_mut(self.data.len());
        data.copy_from_slice(&self.data);
        sw.copy_from_slice(&self.status.0.to_be_bytes());

        Ok(n)
    }
}

/// Replies carry no length, the status word occupies the final two bytes of
/// the buffer
impl DecodeOwned for Response {
    type Output = Self;

    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::MissingStatus);
        }

        let (data, sw) = buff.split_at(buff.len() - 2);

        Ok((
            Self {
                data: data.to_vec(),
                status: StatusWord(u16::from_be_bytes([sw[0], sw[1]])),
            },
            buff.len(),
        ))
    }
}
