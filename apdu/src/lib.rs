// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Protocol / APDU definitions for CoolWallet secure element communication
//!
//! This crate provides the wire-level pieces shared by every CoolWallet host
//! transport: command frame assembly, payload segmentation and response
//! reassembly, reply status parsing and the session / transaction state
//! machines driven by the host library.
//!
//! Commands travel as ASCII-hex strings with fixed-offset fields:
//!
//! ```text
//! +-----+-----+-----+-----+----+----+-----------+-----------+------+
//! | PID | LEN | CLA | INS | P1 | P2 | ORI_LEN   | XOR_LEN   | SEGS |
//! | 1B  | 1B  | 1B  | 1B  | 1B | 1B | u16 (BE)  | u16 (BE)  | 1B   |
//! +-----+-----+-----+-----+----+----+-----------+-----------+------+
//! ```
//!
//! Payloads (data followed by an XOR checksum byte) are streamed after the
//! command in [`PACKET_DATA_SIZE`] byte packets, see [`packet`].
//!

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

use num_enum::TryFromPrimitive;
use strum::Display;

pub mod codec;
pub mod command;
pub mod packet;
pub mod response;
pub mod state;

pub use command::{assemble, checksum, Apdu, CommandFrame};
pub use packet::{segment, Packet, Reassembler};
pub use response::{Response, StatusWord};

/// Packet identifier prefixed to every command frame
pub const PACKET_ID: u8 = 0x00;

/// Length of the command frame body following the packet id and length bytes
pub const COMMAND_LENGTH: u8 = 0x09;

/// Maximum payload bytes carried per data packet
pub const PACKET_DATA_SIZE: usize = 18;

/// Length of the packet header (sequence number and length bytes)
pub const PACKET_HEADER_SIZE: usize = 2;

/// Status value reported by the device once a command has completed
pub const COMMAND_FINISH_CODE: u8 = 0x81;

/// Response frame terminating a reassembled response
pub const MCU_FINISH_CODE: &[u8] = &[0xfc];

/// Command execution target
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum Target {
    /// Secure element, replies terminate with a status word
    Se,
    /// Bluetooth / power micro-controller
    Mcu,
}

/// Secure element APDU class
pub const SE_CLA: u8 = 0x80;

/// MCU control APDU class
pub const MCU_CLA: u8 = 0x7f;

/// CoolWallet instruction codes used by the signing flows
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// Upload a signing script
    SendScript = 0xac,

    /// Execute the loaded script against an argument
    ExecuteScript = 0xa2,

    /// Execute the loaded script for a single UTXO input
    ExecuteUtxoScript = 0xa3,

    /// Set the key id used to derive the change address
    SetChangeKeyId = 0x40,

    /// Signal all signing material has been loaded
    FinishPrepare = 0x33,

    /// Display transaction details and await user approval
    GetTxDetail = 0x34,

    /// Fetch the key used to decrypt signatures
    GetSignatureKey = 0x35,

    /// Clear the transaction context
    ClearTransaction = 0x36,

    /// Power off the card
    PowerOff = 0x80,
}

impl Instruction {
    /// Class byte for the instruction
    pub const fn cla(&self) -> u8 {
        match self.target() {
            Target::Se => SE_CLA,
            Target::Mcu => MCU_CLA,
        }
    }

    /// Target executing the instruction
    pub const fn target(&self) -> Target {
        match self {
            Instruction::PowerOff => Target::Mcu,
            _ => Target::Se,
        }
    }

    /// Assemble an [`Apdu`] for this instruction
    pub fn apdu(&self, p1: u8, p2: u8, data: &[u8]) -> Result<Apdu, ApduError> {
        assemble(self.cla(), *self as u8, p1, p2, data)
    }
}

/// APDU encoding / decoding errors
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApduError {
    /// Invalid hex string
    InvalidHex,
    /// Command does not match the fixed frame layout
    MalformedCommand,
    /// Payload exceeds the number of addressable packets
    PayloadTooLong(usize),
    /// Response frame shorter than the packet header
    InvalidFrame,
    /// Response too short to contain a status word
    MissingStatus,
    /// Buffer too short for encode / decode
    InvalidLength,
}

impl core::fmt::Display for ApduError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ApduError::InvalidHex => write!(f, "invalid hex encoding"),
            ApduError::MalformedCommand => write!(f, "malformed command frame"),
            ApduError::PayloadTooLong(n) => write!(f, "payload too long ({n} bytes)"),
            ApduError::InvalidFrame => write!(f, "invalid response frame"),
            ApduError::MissingStatus => write!(f, "response missing status word"),
            ApduError::InvalidLength => write!(f, "invalid buffer length"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ApduError {}

impl From<hex::FromHexError> for ApduError {
    fn from(_: hex::FromHexError) -> Self {
        ApduError::InvalidHex
    }
}

impl From<encdec::Error> for ApduError {
    fn from(_: encdec::Error) -> Self {
        ApduError::InvalidLength
    }
}
