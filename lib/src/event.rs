// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Signing flow progress events

use strum::{Display, EnumString};

/// Progress events emitted during signing flows
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString)]
pub enum SignEvent {
    /// Transaction details have been displayed and approved on-device
    Displayed,
    /// Signing completed and the card powered off
    UserApproved,
    /// User declined the transaction on-device
    UserDeclined,
}

/// Listener for [SignEvent]s
pub trait EventListener: Send + Sync {
    fn on_event(&self, evt: SignEvent);
}

impl<F: Fn(SignEvent) + Send + Sync> EventListener for F {
    fn on_event(&self, evt: SignEvent) {
        (self)(evt)
    }
}

/// Listener discarding all events
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopListener;

impl EventListener for NoopListener {
    fn on_event(&self, _evt: SignEvent) {}
}
