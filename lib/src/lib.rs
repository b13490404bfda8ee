// Copyright (c) 2023 CoolBitX Technology Ltd.

//! CoolWallet API Library (and CLI)
//!
//! Provides APDU sessions over frame-level ([FrameChannel]) and HTTP bridge
//! transports, and script-flow signing with signature post-processing.
//!
//! ```no_run
//! use coolwallet::{flow::*, signature::SignatureType, *};
//!
//! # async fn sign() -> Result<(), Error> {
//! let t = BridgeTransport::new(&BridgeOptions::default())?;
//! let handle = GenericHandle::new(t);
//!
//! let _s = get_single_signature(
//!     &handle,
//!     &[ScriptFlow::send_script("03000202c7")?],
//!     &ScriptFlow::execute_script("15000000")?,
//!     SignatureType::Der,
//!     &|e: SignEvent| println!("event: {e}"),
//!     &SignOptions::default(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;

use async_trait::async_trait;

/// Re-export `coolwallet-apdu` for consumers
pub use coolwallet_apdu::{self as apdu};

/// Transport abstractions
pub mod transport;
pub use transport::{FrameChannel, FramedTransport, GenericTransport, Transport};

#[cfg(feature = "transport_bridge")]
mod bridge;
#[cfg(feature = "transport_bridge")]
pub use bridge::{BridgeOptions, BridgeRequest, BridgeTransport, DEFAULT_BRIDGE_URL};

pub mod session;
pub use session::{CancelToken, SessionConfig};

mod handle;
pub use handle::DeviceHandle;

mod error;
pub use error::Error;

pub mod event;
pub use event::{EventListener, NoopListener, SignEvent};

pub mod flow;

pub mod signature;

/// Generic CoolWallet device handle (abstract over transport types)
pub type GenericHandle = DeviceHandle<GenericTransport>;

impl GenericHandle {
    /// Create a new generic device handle
    pub fn new(d: impl Into<GenericTransport>) -> Self {
        Self::from(d.into())
    }
}

/// Connect trait for supported transports
#[async_trait]
pub trait Connect<T: Transport> {
    type Options: Debug;

    /// Connect to the specified device
    async fn connect(&self, opts: &Self::Options) -> Result<DeviceHandle<T>, Error>;
}

/// CoolWallet provider, creates device handles for supported transports
#[derive(Clone, Debug, Default)]
pub struct CoolWalletProvider;

/// Connect implementation for bridge devices
#[cfg(feature = "transport_bridge")]
#[async_trait]
impl Connect<BridgeTransport> for CoolWalletProvider {
    type Options = BridgeOptions;

    async fn connect(&self, opts: &Self::Options) -> Result<DeviceHandle<BridgeTransport>, Error> {
        let t = BridgeTransport::new(opts)?;

        log::debug!("Using bridge at: {}", t.url());

        Ok(DeviceHandle::from(t))
    }
}

/// Generic connect implementation
#[cfg(feature = "transport_bridge")]
#[async_trait]
impl Connect<GenericTransport> for CoolWalletProvider {
    type Options = BridgeOptions;

    async fn connect(&self, opts: &Self::Options) -> Result<DeviceHandle<GenericTransport>, Error> {
        let t = BridgeTransport::new(opts)?;

        Ok(DeviceHandle::from(GenericTransport::Bridge(t)))
    }
}
