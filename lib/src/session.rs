// Copyright (c) 2023 CoolBitX Technology Ltd.

//! APDU session driver for frame-bounded transports
//!
//! A [Session] is created per request and drives a [FrameChannel] through
//! command, data streaming, status polling and response reassembly. All
//! state is local to the session so requests never share coordination state.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, trace};
use tokio::sync::Notify;

use coolwallet_apdu::{
    packet::Progress, segment, state::SessionState, Reassembler, COMMAND_FINISH_CODE,
};

use crate::{transport::FrameChannel, Error};

/// Session configuration
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Delay between status polls
    pub poll_interval: Duration,

    /// Maximum time to wait for command completion (ie. user approval),
    /// `None` waits indefinitely
    pub approval_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            approval_timeout: None,
        }
    }
}

/// Cancellation token for pending requests
///
/// Cloned tokens share state, cancelling any clone cancels all. A cancelled
/// token remains cancelled, failing every later request it is attached to,
/// until [CancelToken::reset] is called.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<CancelInner>);

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel pending (and future) requests using this token
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    /// Clear cancellation so the token may be reused for later requests
    pub fn reset(&self) {
        self.0.cancelled.store(false, Ordering::SeqCst);
    }

    /// Check whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let n = self.0.notify.notified();

            if self.is_cancelled() {
                return;
            }

            n.await;
        }
    }
}

/// Single-request session over a [FrameChannel]
pub struct Session<'a, C: FrameChannel + ?Sized> {
    channel: &'a mut C,
    config: &'a SessionConfig,
    cancel: Option<CancelToken>,
    state: SessionState,
}

impl<'a, C: FrameChannel + ?Sized> Session<'a, C> {
    /// Create a new session bound to the provided channel
    pub fn new(channel: &'a mut C, config: &'a SessionConfig) -> Self {
        Self {
            channel,
            config,
            cancel: None,
            state: SessionState::Idle,
        }
    }

    /// Attach a cancellation token to the session
    pub fn with_cancel(mut self, cancel: Option<CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch the current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Execute the session, returning the reassembled response bytes
    pub async fn run(mut self, command: &[u8], payload: &[u8]) -> Result<Vec<u8>, Error> {
        match self.exchange(command, payload).await {
            Ok(v) => {
                self.transition(SessionState::Completed);
                Ok(v)
            }
            Err(e) => {
                debug!("session failed in state {}: {}", self.state, e);
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition(next),
            "invalid session transition {} -> {}",
            self.state,
            next
        );

        trace!("session {} -> {}", self.state, next);
        self.state = next;
    }

    async fn exchange(&mut self, command: &[u8], payload: &[u8]) -> Result<Vec<u8>, Error> {
        if let Some(c) = &self.cancel {
            if c.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        // Segment prior to I/O so oversize payloads fail without side effects
        let packets = segment(payload)?;

        self.channel.write_command(command).await?;
        self.transition(SessionState::CommandSent);

        if !packets.is_empty() {
            self.transition(SessionState::Streaming);

            debug!("streaming {} packets", packets.len());

            for p in &packets {
                trace!("write packet {}/{}", p.seq, packets.len());
                self.channel.write_data(&p.to_vec()?).await?;
            }
        }

        self.transition(SessionState::AwaitingStatus);
        self.await_finish().await?;

        self.read_response().await
    }

    /// Poll card status until the finish code is returned, the approval
    /// timeout elapses or the session is cancelled
    async fn await_finish(&mut self) -> Result<(), Error> {
        let interval = self.config.poll_interval;
        let deadline = self.config.approval_timeout;
        let cancel = self.cancel.clone();

        let poll = poll_status(&mut *self.channel, interval);

        let bounded = async {
            match deadline {
                Some(d) => tokio::time::timeout(d, poll)
                    .await
                    .map_err(|_| Error::UserTimeout)?,
                None => poll.await,
            }
        };

        tokio::select! {
            r = bounded => r,
            _ = wait_cancelled(cancel) => {
                debug!("session cancelled while awaiting status");
                Err(Error::Cancelled)
            },
        }
    }

    /// Read response frames until the finish frame is received
    async fn read_response(&mut self) -> Result<Vec<u8>, Error> {
        let mut r = Reassembler::new();

        loop {
            let frame = self.channel.read_response().await?;

            if r.push(&frame)? == Progress::Complete {
                break;
            }
        }

        trace!("reassembled {} response frames", r.frames());

        Ok(r.into_inner())
    }
}

/// Poll status until the finish code is observed, non-finish codes are
/// never treated as failures
async fn poll_status<C: FrameChannel + ?Sized>(
    channel: &mut C,
    interval: Duration,
) -> Result<(), Error> {
    let mut polls = 0usize;

    loop {
        let status = channel.read_status().await?;
        polls += 1;

        if status == COMMAND_FINISH_CODE {
            trace!("command finished after {} polls", polls);
            return Ok(());
        }

        trace!("card status: {:02x}, retrying", status);
        tokio::time::sleep(interval).await;
    }
}

async fn wait_cancelled(cancel: Option<CancelToken>) {
    match cancel {
        Some(c) => c.cancelled().await,
        None => futures::future::pending::<()>().await,
    }
}
