// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Scripted in-memory CoolWallet for integration tests

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use encdec::DecodeOwned;
use log::{debug, LevelFilter};
use simplelog::SimpleLogger;

use coolwallet::{
    apdu::{
        checksum, segment, CommandFrame, Instruction, Packet, StatusWord, Target,
        COMMAND_FINISH_CODE, MCU_FINISH_CODE,
    },
    signature::encrypt,
    Error, FrameChannel, FramedTransport, SessionConfig,
};

/// Setup logging from the `LOG_LEVEL` environment variable
pub fn setup_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Session configuration with fast polling for tests
pub fn test_config() -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_millis(1),
        approval_timeout: None,
    }
}

/// Frame-level call recorded by [MockChannel]
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Command(Vec<u8>),
    Data(Vec<u8>),
    Status,
    Response,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Card behaviour behind a [MockChannel]
pub trait Card: Send {
    /// Handle a command, returning the raw reply (data and status where
    /// applicable)
    fn handle(&mut self, frame: &CommandFrame, data: &[u8]) -> Vec<u8>;
}

/// Card echoing command data followed by a success status
#[derive(Default)]
pub struct EchoCard;

impl Card for EchoCard {
    fn handle(&mut self, _frame: &CommandFrame, data: &[u8]) -> Vec<u8> {
        [data, &[0x90, 0x00]].concat()
    }
}

/// Frame channel simulating the BLE characteristic interface of a card
pub struct MockChannel<C: Card> {
    card: C,
    calls: CallLog,

    /// Number of non-finish statuses returned before completion
    pub busy_polls: usize,
    /// Fail status reads with a disconnection
    pub fail_status: bool,

    command: Option<CommandFrame>,
    payload: Vec<u8>,
    polls: usize,
    response: Option<VecDeque<Vec<u8>>>,
}

impl<C: Card> MockChannel<C> {
    pub fn new(card: C) -> Self {
        Self {
            card,
            calls: Arc::new(Mutex::new(vec![])),
            busy_polls: 0,
            fail_status: false,
            command: None,
            payload: vec![],
            polls: 0,
            response: None,
        }
    }

    /// Fetch a handle to the call log
    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    fn record(&self, c: Call) {
        self.calls.lock().unwrap().push(c);
    }

    /// Execute the pending command against the card, queueing response frames
    fn complete(&mut self) -> Result<(), Error> {
        let frame = self.command.ok_or(Error::UnexpectedResponse)?;

        // Check received payload against the command frame
        assert_eq!(self.payload.len(), frame.xor_len as usize);

        let data = match self.payload.split_last() {
            Some((c, d)) => {
                assert_eq!(*c, checksum(d), "checksum mismatch");
                d.to_vec()
            }
            None => vec![],
        };

        let reply = self.card.handle(&frame, &data);

        let mut frames = segment(&reply)?
            .iter()
            .map(Packet::to_vec)
            .collect::<Result<VecDeque<_>, _>>()?;
        frames.push_back(MCU_FINISH_CODE.to_vec());

        self.response = Some(frames);

        Ok(())
    }
}

#[async_trait]
impl<C: Card> FrameChannel for MockChannel<C> {
    async fn write_command(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.record(Call::Command(frame.to_vec()));

        self.command = Some(CommandFrame::parse(&hex::encode(frame))?);
        self.payload.clear();
        self.polls = 0;
        self.response = None;

        Ok(())
    }

    async fn write_data(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.record(Call::Data(frame.to_vec()));

        let (p, _n) = Packet::decode_owned(frame)?;
        self.payload.extend_from_slice(&p.data);

        Ok(())
    }

    async fn read_status(&mut self) -> Result<u8, Error> {
        self.record(Call::Status);

        if self.fail_status {
            return Err(Error::DeviceDisconnected);
        }

        if self.polls < self.busy_polls {
            self.polls += 1;
            return Ok(0x00);
        }

        if self.response.is_none() {
            self.complete()?;
        }

        Ok(COMMAND_FINISH_CODE)
    }

    async fn read_response(&mut self) -> Result<Vec<u8>, Error> {
        self.record(Call::Response);

        self.response
            .as_mut()
            .and_then(|r| r.pop_front())
            .ok_or(Error::DeviceDisconnected)
    }
}

/// Simulated secure element supporting the signing script flow
pub struct SimCard {
    /// Signature material (DER), returned in order by script executions
    pub signatures: VecDeque<Vec<u8>>,
    /// Signature encryption key
    pub key: [u8; 32],
    /// Decline transactions at the detail display
    pub decline: bool,
    /// Fail the specified instruction with an error status
    pub fail_ins: Option<u8>,
    /// Executed instructions
    pub log: Arc<Mutex<Vec<u8>>>,

    script_loaded: bool,
}

impl SimCard {
    pub fn new(signatures: Vec<Vec<u8>>, key: [u8; 32]) -> Self {
        Self {
            signatures: signatures.into(),
            key,
            decline: false,
            fail_ins: None,
            log: Arc::new(Mutex::new(vec![])),
            script_loaded: false,
        }
    }
}

/// Status-only reply
fn status(sw: StatusWord) -> Vec<u8> {
    sw.0.to_be_bytes().to_vec()
}

impl Card for SimCard {
    fn handle(&mut self, frame: &CommandFrame, _data: &[u8]) -> Vec<u8> {
        debug!("sim: cla: {:02x} ins: {:02x}", frame.cla, frame.ins);

        self.log.lock().unwrap().push(frame.ins);

        if Some(frame.ins) == self.fail_ins {
            return status(StatusWord::WRONG_DATA);
        }

        let ins = match Instruction::try_from(frame.ins) {
            Ok(i) if i.cla() == frame.cla => i,
            _ => return status(StatusWord::INS_NOT_SUPPORTED),
        };

        // MCU replies carry no status word
        if ins.target() == Target::Mcu {
            return vec![];
        }

        match ins {
            Instruction::SendScript => {
                self.script_loaded = true;
                status(StatusWord::SUCCESS)
            }
            Instruction::ExecuteScript | Instruction::ExecuteUtxoScript if self.script_loaded => {
                match self.signatures.pop_front() {
                    Some(s) => {
                        let c = encrypt(&s, &self.key).unwrap();
                        [c, status(StatusWord::SUCCESS)].concat()
                    }
                    None => status(StatusWord::CONDITIONS_NOT_SATISFIED),
                }
            }
            Instruction::ExecuteScript | Instruction::ExecuteUtxoScript => {
                status(StatusWord::CONDITIONS_NOT_SATISFIED)
            }
            Instruction::GetTxDetail if self.decline => status(StatusWord::CANCELED_BY_USER),
            Instruction::GetSignatureKey => {
                [self.key.to_vec(), status(StatusWord::SUCCESS)].concat()
            }
            _ => status(StatusWord::SUCCESS),
        }
    }
}

/// Build a framed transport over a mock channel, returning the call log
pub fn framed<C: Card>(card: C) -> (FramedTransport<MockChannel<C>>, CallLog) {
    let c = MockChannel::new(card);
    let calls = c.calls();

    (FramedTransport::with_config(c, test_config()), calls)
}
