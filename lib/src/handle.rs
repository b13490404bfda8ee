// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Handle for connected CoolWallet devices
//!
//! This provides methods for interacting with the device
//! and is generic over [Transport]

use std::sync::Arc;

use log::debug;
use tokio::sync::{Mutex, MutexGuard};

use coolwallet_apdu::{Apdu, Instruction, Response, StatusWord, Target};

use crate::{transport::Transport, Error};

/// CoolWallet handle for a connected [Transport].
///
/// Handles may be cloned, requests and signing flows are serialised
/// through the inner mutex.
pub struct DeviceHandle<T: Transport> {
    /// Transport for communication
    t: Arc<Mutex<T>>,
}

/// Clones share the underlying transport
impl<T: Transport> Clone for DeviceHandle<T> {
    fn clone(&self) -> Self {
        Self { t: self.t.clone() }
    }
}

/// Create a [DeviceHandle] wrapper from a type implementing [Transport]
impl<T: Transport> From<T> for DeviceHandle<T> {
    fn from(t: T) -> Self {
        Self {
            t: Arc::new(Mutex::new(t)),
        }
    }
}

impl<T: Transport> DeviceHandle<T> {
    /// Acquire exclusive access to the transport, held for the lifetime of
    /// the returned guard
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.t.lock().await
    }

    /// Issue a raw request, returning the hex encoded response
    pub async fn request(&self, apdu: &Apdu) -> Result<String, Error> {
        self.t.lock().await.request(&apdu.command, &apdu.data).await
    }

    /// Execute an instruction, returning response data on success
    pub async fn execute(
        &self,
        ins: Instruction,
        p1: u8,
        p2: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut t = self.t.lock().await;
        execute(&mut *t, ins, p1, p2, data).await
    }

    /// Power off the card
    pub async fn power_off(&self) -> Result<(), Error> {
        self.execute(Instruction::PowerOff, 0x00, 0x00, &[])
            .await
            .map(|_| ())
    }
}

/// Exchange an [Apdu] and parse the reply
///
/// MCU commands may reply without a status word, these are returned as
/// successful empty responses.
pub(crate) async fn exchange<T: Transport + ?Sized>(
    t: &mut T,
    apdu: &Apdu,
    target: Target,
) -> Result<Response, Error> {
    let resp = t.request(&apdu.command, &apdu.data).await?;

    match (target, resp.is_empty()) {
        (Target::Mcu, true) => Ok(Response {
            data: vec![],
            status: StatusWord::SUCCESS,
        }),
        _ => Ok(Response::from_hex(&resp)?),
    }
}

/// Execute an instruction over a locked transport, mapping non-success
/// status words to [Error::Status]
///
/// For use by [crate::flow::Action] implementations.
pub async fn execute<T: Transport + ?Sized>(
    t: &mut T,
    ins: Instruction,
    p1: u8,
    p2: u8,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let apdu = ins.apdu(p1, p2, data)?;

    debug!("execute {} ({} bytes)", ins, data.len());

    let resp = exchange(t, &apdu, ins.target()).await?;

    check(ins as u8, resp)
}

/// Check a response status, returning the response data on success
pub(crate) fn check(ins: u8, resp: Response) -> Result<Vec<u8>, Error> {
    match resp.status.is_success() {
        true => Ok(resp.data),
        false => {
            match Instruction::try_from(ins) {
                Ok(i) => debug!("{} failed: {}", i, resp.status),
                Err(_) => debug!("instruction {:02x} failed: {}", ins, resp.status),
            }
            Err(Error::Status {
                status: resp.status,
                ins,
            })
        }
    }
}
