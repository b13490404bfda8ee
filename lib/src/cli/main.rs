// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Command line utility for interacting with CoolWallet devices

use std::{path::Path, str::FromStr};

use clap::Parser;
use log::{debug, error, info, LevelFilter};
use serde::{de::DeserializeOwned, Serialize};

use coolwallet::{
    apdu::{assemble, Response},
    flow::{get_signatures_v2, SignOptions},
    signature::SignatureType,
    Connect, CoolWalletProvider, DeviceHandle, GenericTransport, SignEvent, Transport,
};

mod helpers;
use helpers::*;

/// CoolWallet command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Bridge connection options
    #[clap(flatten)]
    bridge: coolwallet::BridgeOptions,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

/// Raw APDU arguments
#[derive(Clone, PartialEq, Debug, clap::Args)]
struct ApduArgs {
    /// Instruction class (hex)
    #[clap(long, value_parser = parse_u8_hex)]
    cla: u8,

    /// Instruction code (hex)
    #[clap(long, value_parser = parse_u8_hex)]
    ins: u8,

    /// First parameter (hex)
    #[clap(long, value_parser = parse_u8_hex, default_value = "00")]
    p1: u8,

    /// Second parameter (hex)
    #[clap(long, value_parser = parse_u8_hex, default_value = "00")]
    p2: u8,

    /// Command data (hex)
    #[clap(long)]
    data: Option<HexData>,
}

impl ApduArgs {
    fn data(&self) -> &[u8] {
        self.data.as_ref().map(|d| d.as_ref()).unwrap_or(&[])
    }
}

#[derive(Clone, PartialEq, Debug, Parser)]
#[non_exhaustive]
enum Actions {
    /// Assemble an APDU without sending it
    Assemble(ApduArgs),

    #[clap(flatten)]
    Device(DeviceActions),
}

/// Commands requiring a connected device
#[derive(Clone, PartialEq, Debug, clap::Subcommand)]
enum DeviceActions {
    /// Exchange a single APDU with the device
    Exchange(ApduArgs),

    /// Execute a signing flow from a request file
    Sign {
        /// Signing request file (json)
        #[clap(long)]
        input: String,

        /// Signing response file (json)
        #[clap(long)]
        output: String,

        /// Output signature encoding
        #[clap(long, value_enum, default_value = "der")]
        signature_type: SignatureType,
    },

    /// Power off the card
    PowerOff,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default())?;

    let cmd = match args.cmd {
        // Assembly does not require a device
        Actions::Assemble(a) => {
            let apdu = assemble(a.cla, a.ins, a.p1, a.p2, a.data())?;

            info!("command: {}", apdu.command);
            info!("data:    {}", apdu.data);

            return Ok(());
        }
        Actions::Device(c) => c,
    };

    debug!("Using bridge: {}", args.bridge.bridge_url);

    // Connect to device
    let p = CoolWalletProvider;
    let t = match Connect::<GenericTransport>::connect(&p, &args.bridge).await {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to connect to bridge: {}", args.bridge.bridge_url);
            return Err(e.into());
        }
    };

    // Execute command
    execute(t, cmd).await?;

    Ok(())
}

/// Execute a command with the provided handle
async fn execute<T: Transport>(t: DeviceHandle<T>, cmd: DeviceActions) -> anyhow::Result<()> {
    debug!("Executing command: {:?}", cmd);

    match cmd {
        DeviceActions::Exchange(a) => {
            let apdu = assemble(a.cla, a.ins, a.p1, a.p2, a.data())?;

            let resp = t.request(&apdu).await?;
            let resp = Response::from_hex(&resp)?;

            info!("data:   {}", hex::encode(&resp.data));
            info!("status: {}", resp.status);
        }
        DeviceActions::Sign {
            input,
            output,
            signature_type,
        } => {
            let req: SignReq = read_input(&input).await?;

            // Build pre-actions and signing actions
            let pre_actions = req.pre_actions()?;
            let actions = req.actions()?;

            let options = SignOptions {
                message_hash: match &req.message_hash {
                    Some(h) => Some(HexData::from_str(h)?.0.as_slice().try_into()?),
                    None => None,
                },
                public_key: match &req.public_key {
                    Some(k) => Some(HexData::from_str(k)?.0),
                    None => None,
                },
            };

            info!("Review and approve the transaction on your device");

            let signatures = get_signatures_v2(
                &t,
                &pre_actions,
                &actions,
                signature_type,
                &|e: SignEvent| info!("Signing event: {}", e),
                &options,
            )
            .await?;

            let resp = SignResp {
                signatures: signatures.iter().map(|s| hex::encode(s.to_bytes())).collect(),
            };

            write_output(&output, &resp).await?;
        }
        DeviceActions::PowerOff => {
            t.power_off().await?;

            info!("Card powered off");
        }
    }

    Ok(())
}

/// Helper to read input files where required
async fn read_input<T: DeserializeOwned>(file_name: &str) -> anyhow::Result<T> {
    debug!("Reading input from '{}'", file_name);

    let s = tokio::fs::read_to_string(file_name).await?;

    // Determine format from file name
    let p = Path::new(file_name);

    // Decode based on input extension
    let v = match p.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&s)?,
        _ => return Err(anyhow::anyhow!("unsupported input file format")),
    };

    Ok(v)
}

/// Helper to write output files
async fn write_output(file_name: &str, value: &impl Serialize) -> anyhow::Result<()> {
    debug!("Writing output to '{}'", file_name);

    // Determine format from file name
    let p = Path::new(file_name);
    match p.extension().and_then(|e| e.to_str()) {
        // Encode to JSON for `.json` files
        Some("json") => {
            let s = serde_json::to_string(value)?;
            tokio::fs::write(p, s).await?;
        }
        _ => return Err(anyhow::anyhow!("unsupported output file format")),
    }

    Ok(())
}
