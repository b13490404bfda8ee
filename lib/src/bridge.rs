// Copyright (c) 2023 CoolBitX Technology Ltd.

//! HTTP bridge transport
//!
//! Forwards APDUs to a local bridge service holding the device connection,
//! which runs the frame-level session on our behalf.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use coolwallet_apdu::{codec, CommandFrame};

use crate::{transport::Transport, Error};

/// Default bridge endpoint
pub const DEFAULT_BRIDGE_URL: &str = "http://localhost:9527";

/// Bridge connection options
#[derive(Clone, Debug, PartialEq, clap::Args)]
pub struct BridgeOptions {
    /// Bridge service URL
    #[clap(long, env = "COOLWALLET_BRIDGE", default_value = DEFAULT_BRIDGE_URL)]
    pub bridge_url: String,

    /// HTTP request timeout in seconds (unbounded where unset, as requests
    /// may wait on user approval)
    #[clap(long)]
    pub bridge_timeout_s: Option<u64>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            bridge_timeout_s: None,
        }
    }
}

/// Bridge request body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub cla: String,
    pub ins: String,
    pub p1: String,
    pub p2: String,
    /// Payload data without the trailing checksum byte
    pub data: String,
}

impl BridgeRequest {
    /// Build a bridge request from hex-encoded command and packets
    pub fn new(command: &str, packets: &str) -> Result<Self, Error> {
        let frame = CommandFrame::parse(command)?;

        let payload = codec::decode(packets)?;

        // The bridge recomputes the checksum, strip ours
        let data = match payload.split_last() {
            Some((_checksum, d)) => hex::encode(d),
            None => String::new(),
        };

        Ok(Self {
            cla: format!("{:02x}", frame.cla),
            ins: format!("{:02x}", frame.ins),
            p1: format!("{:02x}", frame.p1),
            p2: format!("{:02x}", frame.p2),
            data,
        })
    }
}

/// HTTP bridge transport
pub struct BridgeTransport {
    client: reqwest::Client,
    url: String,
}

impl BridgeTransport {
    /// Create a new bridge transport, no connection is made until the first
    /// request
    pub fn new(opts: &BridgeOptions) -> Result<Self, Error> {
        let mut b = reqwest::Client::builder();

        if let Some(t) = opts.bridge_timeout_s {
            b = b.timeout(Duration::from_secs(t));
        }

        Ok(Self {
            client: b.build()?,
            url: opts.bridge_url.clone(),
        })
    }

    /// Fetch the bridge URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn request(&mut self, command: &str, packets: &str) -> Result<String, Error> {
        let req = BridgeRequest::new(command, packets)?;

        debug!("bridge request: {:?}", req);

        let resp = self.client.post(&self.url).json(&req).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Http(format!("bridge returned {}", resp.status())));
        }

        let body = resp.text().await?;
        let body = body.trim().trim_start_matches("0x").to_lowercase();

        trace!("bridge response: {}", body);

        // Replies must be valid hex
        codec::decode(&body)?;

        Ok(body)
    }
}
