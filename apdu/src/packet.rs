// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Payload segmentation and response reassembly for frame-bounded
//! transports (BLE / NFC)
//!
//! ## Packet encoding:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      SEQ      |      LEN      |                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! /                       DATA (<= 18 bytes)                      /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Sequence numbers start at 1. Responses carry no length announcement,
//! reassembly continues until a frame equal to [`MCU_FINISH_CODE`] is read.

use alloc::{string::String, vec, vec::Vec};

use encdec::{DecodeOwned, Encode};

use crate::{ApduError, MCU_FINISH_CODE, PACKET_DATA_SIZE, PACKET_HEADER_SIZE};

/// Single payload packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number (1-indexed)
    pub seq: u8,
    /// Packet data
    pub data: Vec<u8>,
}

impl Packet {
    /// Encode packet for transmission
    pub fn to_vec(&self) -> Result<Vec<u8>, ApduError> {
        let mut b = vec![0u8; self.encode_len()?];
        let n = self.encode(&mut b)?;
        b.truncate(n);

        Ok(b)
    }
}

impl Encode for Packet {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(PACKET_HEADER_SIZE + self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;

        if self.data.len() > PACKET_DATA_SIZE || buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = self.seq;
        buff[1] = self.data.len() as u8;
        buff[PACKET_HEADER_SIZE..n].copy_from_slice(&self.data);

        Ok(n)
    }
}

impl DecodeOwned for Packet {
    type Output = Self;

    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (seq, len) = match buff {
            [seq, len, ..] => (*seq, *len as usize),
            _ => return Err(ApduError::InvalidFrame),
        };

        let data = buff[PACKET_HEADER_SIZE..]
            .get(..len)
            .ok_or(ApduError::InvalidFrame)?;

        Ok((
            Self {
                seq,
                data: data.to_vec(),
            },
            PACKET_HEADER_SIZE + len,
        ))
    }
}

/// Split a payload into ordered packets of at most [`PACKET_DATA_SIZE`] bytes
///
/// An empty payload produces no packets.
pub fn segment(payload: &[u8]) -> Result<Vec<Packet>, ApduError> {
    if payload.len() > u8::MAX as usize * PACKET_DATA_SIZE {
        return Err(ApduError::PayloadTooLong(payload.len()));
    }

    let packets = payload
        .chunks(PACKET_DATA_SIZE)
        .enumerate()
        .map(|(i, c)| Packet {
            seq: (i + 1) as u8,
            data: c.to_vec(),
        })
        .collect();

    Ok(packets)
}

/// Reassembly progress
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// More frames are expected
    Pending,
    /// Finish code received
    Complete,
}

/// Pull-side response accumulator
///
/// Frames are pushed in the order they are read; each has its packet header
/// stripped and its payload appended until the finish frame arrives.
#[derive(Clone, Debug, Default)]
pub struct Reassembler {
    buff: Vec<u8>,
    frames: usize,
    complete: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a received frame
    pub fn push(&mut self, frame: &[u8]) -> Result<Progress, ApduError> {
        if self.complete {
            return Ok(Progress::Complete);
        }

        if frame == MCU_FINISH_CODE {
            #[cfg(feature = "log")]
            log::trace!("response complete ({} frames)", self.frames);

            self.complete = true;
            return Ok(Progress::Complete);
        }

        if frame.len() < PACKET_HEADER_SIZE {
            return Err(ApduError::InvalidFrame);
        }

        self.buff.extend_from_slice(&frame[PACKET_HEADER_SIZE..]);
        self.frames += 1;

        Ok(Progress::Pending)
    }

    /// Number of payload frames received
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Check whether the finish code has been received
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Fetch the reassembled response bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.buff
    }

    /// Fetch the reassembled response as hex
    pub fn into_hex(self) -> String {
        hex::encode(self.buff)
    }
}
