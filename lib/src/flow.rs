// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Script-flow orchestration for signing
//!
//! Coin modules supply a set of pre-actions (script upload, change key
//! selection) and one or more signing actions (script execution per input).
//! These are executed strictly in order, followed by the transaction
//! finalisation sequence:
//!
//! ```text
//! FinishPrepare -> GetTxDetail -> GetSignatureKey -> ClearTransaction -> PowerOff
//! ```
//!
//! `GetTxDetail` blocks until the user approves or declines the transaction
//! on-device. Signatures returned by actions are encrypted and decrypted
//! with the key retrieved via `GetSignatureKey`.

use async_trait::async_trait;
use log::{debug, info};
use zeroize::Zeroizing;

use coolwallet_apdu::{codec, state::TxState, Apdu, Instruction};

use crate::{
    event::{EventListener, SignEvent},
    handle::{check, exchange},
    signature::{decrypt_and_canonicalize, RecoveryInput, Signature, SignatureType},
    transport::Transport,
    DeviceHandle, Error,
};

pub use crate::handle::execute;

/// Unit of work executed as part of a signing flow
///
/// Actions run with exclusive access to the transport and may issue any
/// number of APDUs, returning the reply data of the final exchange. For
/// signing actions this is the encrypted signature.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, t: &mut dyn Transport) -> Result<Vec<u8>, Error>;
}

#[async_trait]
impl<A: Action + ?Sized> Action for Box<A> {
    async fn run(&self, t: &mut dyn Transport) -> Result<Vec<u8>, Error> {
        (**self).run(t).await
    }
}

/// Sequences run each action in order, returning the final reply data
#[async_trait]
impl<A: Action> Action for Vec<A> {
    async fn run(&self, t: &mut dyn Transport) -> Result<Vec<u8>, Error> {
        let mut resp = vec![];

        for a in self.iter() {
            resp = a.run(t).await?;
        }

        Ok(resp)
    }
}

/// Single labelled APDU
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub ins: Instruction,
    pub apdu: Apdu,
}

impl Command {
    /// Build a command for the provided instruction
    pub fn new(ins: Instruction, p1: u8, p2: u8, data: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            ins,
            apdu: ins.apdu(p1, p2, data)?,
        })
    }
}

#[async_trait]
impl Action for Command {
    async fn run(&self, t: &mut dyn Transport) -> Result<Vec<u8>, Error> {
        debug!("run {}", self.ins);

        let resp = exchange(t, &self.apdu, self.ins.target()).await?;
        check(self.ins as u8, resp)
    }
}

/// Helpers for building standard script actions from hex inputs
pub struct ScriptFlow;

impl ScriptFlow {
    /// Upload a signing script
    pub fn send_script(script: &str) -> Result<Command, Error> {
        Command::new(Instruction::SendScript, 0x00, 0x00, &codec::decode(script)?)
    }

    /// Execute the loaded script against an argument
    pub fn execute_script(argument: &str) -> Result<Command, Error> {
        Command::new(
            Instruction::ExecuteScript,
            0x00,
            0x00,
            &codec::decode(argument)?,
        )
    }

    /// Execute the loaded script against the argument for a UTXO input
    pub fn execute_utxo_script(index: u8, argument: &str) -> Result<Command, Error> {
        Command::new(
            Instruction::ExecuteUtxoScript,
            index,
            0x00,
            &codec::decode(argument)?,
        )
    }

    /// Set the key id used for change output derivation
    pub fn set_change_key_id(key_id: &str, redeem_type: u8) -> Result<Command, Error> {
        Command::new(
            Instruction::SetChangeKeyId,
            redeem_type,
            0x00,
            &codec::decode(key_id)?,
        )
    }
}

/// Signing flow options
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignOptions {
    /// Signed message hash, enables recovery parameter computation for
    /// [SignatureType::Canonical] signatures
    pub message_hash: Option<[u8; 32]>,

    /// Expected signer public key (SEC1), required with `message_hash`
    pub public_key: Option<Vec<u8>>,
}

impl SignOptions {
    /// Validate options against the requested signature type, prior to any
    /// device I/O
    fn recovery_input(&self, t: SignatureType) -> Result<Option<RecoveryInput>, Error> {
        match (t, &self.message_hash, &self.public_key) {
            (_, None, None) => Ok(None),
            (SignatureType::Canonical, Some(h), Some(k)) => Ok(Some(RecoveryInput::new(*h, k)?)),
            (SignatureType::Canonical, Some(_), None) => {
                Err(Error::Unsupported("recovery requires a public key"))
            }
            (SignatureType::Canonical, None, Some(_)) => {
                Err(Error::Unsupported("recovery requires a message hash"))
            }
            (_, _, _) => Err(Error::Unsupported(
                "recovery only applies to canonical signatures",
            )),
        }
    }
}

/// Execute a single-signature flow, returning the canonicalised signature
///
/// Mixed action types may be supplied as `Box<dyn Action>`.
pub async fn get_single_signature<T, A, L>(
    handle: &DeviceHandle<T>,
    pre_actions: &[A],
    action: &A,
    signature_type: SignatureType,
    listener: &L,
    options: &SignOptions,
) -> Result<Signature, Error>
where
    T: Transport,
    A: Action,
    L: EventListener + ?Sized,
{
    let recovery = options.recovery_input(signature_type)?;

    let mut t = handle.lock().await;
    let t: &mut dyn Transport = &mut *t;

    run_pre_actions(t, pre_actions).await?;

    let raw = action.run(t).await?;

    let key = finalize(t, listener).await?;

    decrypt_and_canonicalize(&raw, Some(&key), signature_type, recovery.as_ref())
}

/// Execute a multi-signature flow (one action per input), returning
/// signatures in action order
pub async fn get_signatures_v2<T, A, L>(
    handle: &DeviceHandle<T>,
    pre_actions: &[A],
    actions: &[A],
    signature_type: SignatureType,
    listener: &L,
    options: &SignOptions,
) -> Result<Vec<Signature>, Error>
where
    T: Transport,
    A: Action,
    L: EventListener + ?Sized,
{
    if actions.is_empty() {
        return Err(Error::Unsupported("no signing actions"));
    }

    let recovery = options.recovery_input(signature_type)?;

    let mut t = handle.lock().await;
    let t: &mut dyn Transport = &mut *t;

    run_pre_actions(t, pre_actions).await?;

    let mut raw = Vec::with_capacity(actions.len());
    for (i, a) in actions.iter().enumerate() {
        debug!("executing action {}/{}", i + 1, actions.len());
        raw.push(a.run(t).await?);
    }

    let key = finalize(t, listener).await?;

    raw.iter()
        .map(|r| decrypt_and_canonicalize(r, Some(&key), signature_type, recovery.as_ref()))
        .collect()
}

async fn run_pre_actions<A: Action>(
    t: &mut dyn Transport,
    pre_actions: &[A],
) -> Result<(), Error> {
    for (i, a) in pre_actions.iter().enumerate() {
        debug!("executing pre-action {}/{}", i + 1, pre_actions.len());
        a.run(t).await?;
    }

    Ok(())
}

/// Run the finalisation sequence, returning the signature decryption key
async fn finalize<L: EventListener + ?Sized>(
    t: &mut dyn Transport,
    listener: &L,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut key = Zeroizing::new(vec![]);
    let mut state = Some(TxState::FinishPrepare);

    while let Some(s) = state {
        let ins = s.instruction();
        let apdu = ins.apdu(0x00, 0x00, &[])?;

        debug!("finalize: {}", s);

        let resp = exchange(&mut *t, &apdu, ins.target()).await?;

        match s {
            TxState::GetTxDetail if !resp.status.is_success() => {
                info!("transaction declined ({})", resp.status);
                listener.on_event(SignEvent::UserDeclined);
                return Err(Error::OperationCanceled);
            }
            TxState::GetSignatureKey => {
                key = Zeroizing::new(check(ins as u8, resp)?);
                listener.on_event(SignEvent::Displayed);
            }
            TxState::PowerOff => {
                check(ins as u8, resp)?;
                listener.on_event(SignEvent::UserApproved);
            }
            _ => {
                check(ins as u8, resp)?;
            }
        }

        state = s.next();
    }

    Ok(key)
}
