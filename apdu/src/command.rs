// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Command frame assembly
//!
//! ## Encoding:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   PACKET_ID   |  COMMAND_LEN  |      CLA      |      INS      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |       P1      |       P2      |         ORI_DATA_LENGTH       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           XOR_LENGTH          |   SEGMENTS    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `ORI_DATA_LENGTH` is the number of [`PACKET_DATA_SIZE`] packets required
//! for the payload less one (zero for an empty payload), `XOR_LENGTH` is the
//! payload length in bytes including the trailing checksum.

use alloc::{format, string::String, vec::Vec};

use encdec::{Decode, Encode};

use crate::{codec, codec::be_u16, ApduError, COMMAND_LENGTH, PACKET_DATA_SIZE, PACKET_ID};

/// Maximum payload length addressable by a single command
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize * PACKET_DATA_SIZE;

/// Encoded command length, including the packet id and length prefix
pub const FRAME_LEN: usize = 2 + COMMAND_LENGTH as usize;

/// Assembled command and payload, hex-encoded as exchanged with transports
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Apdu {
    /// Command frame hex
    pub command: String,
    /// Payload hex (data followed by checksum), empty where no data is sent
    pub data: String,
}

impl Apdu {
    /// Parse the command frame for this APDU
    pub fn frame(&self) -> Result<CommandFrame, ApduError> {
        CommandFrame::parse(&self.command)
    }

    /// Decode the payload bytes for this APDU
    pub fn payload(&self) -> Result<Vec<u8>, ApduError> {
        codec::decode(&self.data)
    }
}

/// Fixed-layout command frame body, following the packet id and command
/// length prefix
#[derive(Copy, Clone, Debug, PartialEq, Eq, Encode, Decode)]
#[encdec(error = "ApduError")]
pub struct CommandFrame {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    /// Packet count less one for non-empty payloads
    #[encdec(with = "be_u16")]
    pub ori_data_len: u16,
    /// Payload length in bytes (including checksum)
    #[encdec(with = "be_u16")]
    pub xor_len: u16,
    /// Number of payload packets
    pub segments: u8,
}

impl CommandFrame {
    /// Length of an encoded frame in hex characters
    pub const HEX_LEN: usize = 2 * FRAME_LEN;

    /// Build a frame for a payload of `payload_len` bytes (checksum included)
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, payload_len: usize) -> Result<Self, ApduError> {
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ApduError::PayloadTooLong(payload_len));
        }

        let segments = payload_len.div_ceil(PACKET_DATA_SIZE);
        let ori_data_len = segments.saturating_sub(1);

        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            ori_data_len: ori_data_len as u16,
            xor_len: payload_len as u16,
            segments: segments as u8,
        })
    }

    /// Encode the prefixed frame
    pub fn to_bytes(&self) -> Result<[u8; FRAME_LEN], ApduError> {
        let mut b = [0u8; FRAME_LEN];

        b[0] = PACKET_ID;
        b[1] = COMMAND_LENGTH;
        self.encode(&mut b[2..])?;

        Ok(b)
    }

    /// Encode the prefixed frame as hex
    pub fn to_hex(&self) -> Result<String, ApduError> {
        self.to_bytes().map(hex::encode)
    }

    /// Decode a prefixed frame, checking the packet id / command length
    pub fn from_bytes(b: &[u8]) -> Result<Self, ApduError> {
        match b {
            [PACKET_ID, COMMAND_LENGTH, body @ ..] if body.len() == COMMAND_LENGTH as usize => {
                let (f, _n) = Self::decode(body)?;
                Ok(f)
            }
            _ => Err(ApduError::MalformedCommand),
        }
    }

    /// Parse a hex frame, anything other than a well-formed prefixed frame
    /// is rejected as malformed
    pub fn parse(s: &str) -> Result<Self, ApduError> {
        let b = hex::decode(s).map_err(|_| ApduError::MalformedCommand)?;
        Self::from_bytes(&b)
    }
}

/// Compute the XOR checksum over payload bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |a, b| a ^ b)
}

/// Assemble a command frame and checksummed payload
///
/// Pure with respect to its inputs, identical arguments always produce
/// identical results.
pub fn assemble(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8]) -> Result<Apdu, ApduError> {
    let payload = match data.is_empty() {
        true => String::new(),
        false => format!("{}{:02x}", hex::encode(data), checksum(data)),
    };

    let frame = CommandFrame::new(cla, ins, p1, p2, payload.len() / 2)?;

    Ok(Apdu {
        command: frame.to_hex()?,
        data: payload,
    })
}
