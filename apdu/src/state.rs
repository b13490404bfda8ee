// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Session and transaction state machines
//!

use strum::{Display, EnumIter, EnumString};

use crate::Instruction;

/// APDU session state, tracked per request by the host session driver
///
/// ```text
/// Idle -> CommandSent -> [Streaming] -> AwaitingStatus -> Completed
///                                              \-------> Failed
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, EnumIter)]
pub enum SessionState {
    Idle,
    CommandSent,
    Streaming,
    AwaitingStatus,
    Completed,
    Failed,
}

impl SessionState {
    /// Check whether the session has finished (successfully or otherwise)
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Check whether `next` is a valid transition from this state
    pub fn can_transition(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, CommandSent) => true,
            (CommandSent, Streaming) | (CommandSent, AwaitingStatus) => true,
            (Streaming, AwaitingStatus) => true,
            (AwaitingStatus, Completed) => true,
            // Any I/O failure prior to completion
            (s, Failed) => !s.is_terminal(),
            _ => false,
        }
    }
}

/// Transaction finalisation steps, executed in order once signing material
/// has been loaded
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, EnumIter)]
pub enum TxState {
    FinishPrepare,
    GetTxDetail,
    GetSignatureKey,
    ClearTransaction,
    PowerOff,
}

impl TxState {
    /// Instruction issued for this step
    pub fn instruction(&self) -> Instruction {
        match self {
            TxState::FinishPrepare => Instruction::FinishPrepare,
            TxState::GetTxDetail => Instruction::GetTxDetail,
            TxState::GetSignatureKey => Instruction::GetSignatureKey,
            TxState::ClearTransaction => Instruction::ClearTransaction,
            TxState::PowerOff => Instruction::PowerOff,
        }
    }

    /// Step following this one, `None` once powered off
    pub fn next(&self) -> Option<TxState> {
        match self {
            TxState::FinishPrepare => Some(TxState::GetTxDetail),
            TxState::GetTxDetail => Some(TxState::GetSignatureKey),
            TxState::GetSignatureKey => Some(TxState::ClearTransaction),
            TxState::ClearTransaction => Some(TxState::PowerOff),
            TxState::PowerOff => None,
        }
    }
}
