// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Transport abstractions for CoolWallet devices

use async_trait::async_trait;
use log::debug;
use strum::Display;

use coolwallet_apdu::{codec, CommandFrame, Instruction};

use crate::{
    session::{CancelToken, Session, SessionConfig},
    Error,
};

#[cfg(feature = "transport_bridge")]
pub use crate::bridge::{BridgeOptions, BridgeTransport};

/// Transport for exchanging assembled APDUs with a device
///
/// `command` is the hex-encoded command frame and `packets` the hex-encoded
/// payload (data and checksum, empty when no data is sent). Replies are the
/// hex-encoded reassembled response.
#[async_trait]
pub trait Transport: Send {
    async fn request(&mut self, command: &str, packets: &str) -> Result<String, Error>;
}

/// Frame-level device channel, as exposed by BLE characteristics
///
/// Every call maps to a single characteristic write or read.
#[async_trait]
pub trait FrameChannel: Send {
    /// Write a command frame
    async fn write_command(&mut self, frame: &[u8]) -> Result<(), Error>;

    /// Write a data packet
    async fn write_data(&mut self, frame: &[u8]) -> Result<(), Error>;

    /// Read the card status byte
    async fn read_status(&mut self) -> Result<u8, Error>;

    /// Read a single response frame
    async fn read_response(&mut self) -> Result<Vec<u8>, Error>;
}

#[async_trait]
impl<C: FrameChannel + ?Sized> FrameChannel for Box<C> {
    async fn write_command(&mut self, frame: &[u8]) -> Result<(), Error> {
        (**self).write_command(frame).await
    }

    async fn write_data(&mut self, frame: &[u8]) -> Result<(), Error> {
        (**self).write_data(frame).await
    }

    async fn read_status(&mut self) -> Result<u8, Error> {
        (**self).read_status().await
    }

    async fn read_response(&mut self) -> Result<Vec<u8>, Error> {
        (**self).read_response().await
    }
}

/// [Transport] implementation running a [Session] per request over a
/// [FrameChannel]
pub struct FramedTransport<C: FrameChannel> {
    channel: C,
    config: SessionConfig,
    cancel: Option<CancelToken>,
}

impl<C: FrameChannel> FramedTransport<C> {
    /// Create a framed transport with default session configuration
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, SessionConfig::default())
    }

    /// Create a framed transport with the provided session configuration
    pub fn with_config(channel: C, config: SessionConfig) -> Self {
        Self {
            channel,
            config,
            cancel: None,
        }
    }

    /// Attach a cancellation token, applied to subsequent requests
    pub fn set_cancel(&mut self, cancel: CancelToken) {
        self.cancel = Some(cancel);
    }

    /// Fetch the session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Release the underlying channel
    pub fn into_inner(self) -> C {
        self.channel
    }
}

#[async_trait]
impl<C: FrameChannel> Transport for FramedTransport<C> {
    async fn request(&mut self, command: &str, packets: &str) -> Result<String, Error> {
        // Validate command layout prior to any I/O
        let frame = CommandFrame::parse(command)?;
        let command = codec::decode(command)?;
        let payload = codec::decode(packets)?;

        match Instruction::try_from(frame.ins) {
            Ok(i) => debug!("request {} ({} payload bytes)", i, payload.len()),
            Err(_) => debug!(
                "request cla: {:02x} ins: {:02x} ({} payload bytes)",
                frame.cla,
                frame.ins,
                payload.len()
            ),
        }

        let resp = Session::new(&mut self.channel, &self.config)
            .with_cancel(self.cancel.clone())
            .run(&command, &payload)
            .await?;

        Ok(hex::encode(resp))
    }
}

/// Generic CoolWallet transport (abstract over transport types)
#[derive(Display)]
#[non_exhaustive]
pub enum GenericTransport {
    Framed(FramedTransport<Box<dyn FrameChannel>>),
    #[cfg(feature = "transport_bridge")]
    Bridge(BridgeTransport),
}

/// Convert a boxed frame channel into a generic transport
impl From<FramedTransport<Box<dyn FrameChannel>>> for GenericTransport {
    fn from(t: FramedTransport<Box<dyn FrameChannel>>) -> Self {
        Self::Framed(t)
    }
}

/// Convert a bridge transport into a generic transport
#[cfg(feature = "transport_bridge")]
impl From<BridgeTransport> for GenericTransport {
    fn from(t: BridgeTransport) -> Self {
        Self::Bridge(t)
    }
}

/// Implementation of [Transport] for [GenericTransport], dispatching to the
/// inner transport
#[async_trait]
impl Transport for GenericTransport {
    async fn request(&mut self, command: &str, packets: &str) -> Result<String, Error> {
        match self {
            Self::Framed(t) => t.request(command, packets).await,
            #[cfg(feature = "transport_bridge")]
            Self::Bridge(t) => t.request(command, packets).await,
        }
    }
}
