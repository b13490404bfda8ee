// Copyright (c) 2023 CoolBitX Technology Ltd.

use serde::{Deserialize, Serialize};

use coolwallet::flow::{Command, ScriptFlow};

/// Variable-length hex argument, accepting an optional `0x` prefix
#[derive(Clone, PartialEq, Debug, Default)]
pub struct HexData(pub Vec<u8>);

impl std::str::FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(s).map(HexData)
    }
}

impl AsRef<[u8]> for HexData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for HexData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Parse a single byte from hex, accepting an optional `0x` prefix
pub fn parse_u8_hex(s: &str) -> Result<u8, std::num::ParseIntError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u8::from_str_radix(s, 16)
}

/// Signing request file, as produced by coin modules
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignReq {
    /// Signing script (hex)
    pub script: String,

    /// Script arguments (hex), one per signature
    pub arguments: Vec<String>,

    /// Execute arguments as UTXO inputs
    #[serde(default)]
    pub utxo: bool,

    /// Change key id (hex), issued as a pre-action where provided
    #[serde(default)]
    pub change_key_id: Option<String>,

    /// Message hash (hex) for recovery parameter computation
    #[serde(default)]
    pub message_hash: Option<String>,

    /// Signer public key (hex) for recovery parameter computation
    #[serde(default)]
    pub public_key: Option<String>,
}

impl SignReq {
    /// Script upload followed by the optional change key selection
    pub fn pre_actions(&self) -> anyhow::Result<Vec<Command>> {
        let mut a = vec![ScriptFlow::send_script(&self.script)?];

        if let Some(k) = &self.change_key_id {
            a.push(ScriptFlow::set_change_key_id(k, 0x00)?);
        }

        Ok(a)
    }

    /// Script executions, one per argument
    pub fn actions(&self) -> anyhow::Result<Vec<Command>> {
        let mut a = Vec::with_capacity(self.arguments.len());

        for (i, arg) in self.arguments.iter().enumerate() {
            let c = match self.utxo {
                true => {
                    let index = u8::try_from(i)
                        .map_err(|_| anyhow::anyhow!("UTXO index {i} out of range"))?;
                    ScriptFlow::execute_utxo_script(index, arg)?
                }
                false => ScriptFlow::execute_script(arg)?,
            };

            a.push(c);
        }

        Ok(a)
    }
}

/// Signing response file
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignResp {
    /// Signatures (hex), in argument order
    pub signatures: Vec<String>,
}
