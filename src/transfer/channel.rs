//! Byte plumbing between the filter and a running session.
//!
//! The filter pushes raw remote output into an unbounded channel; the
//! session reassembles it into protocol lines. Outbound lines go straight
//! to the host's [`ServerWriter`]. Cancellation travels on a watch channel
//! so a session blocked on input wakes up immediately.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::{Result, TransferError};
use crate::transfer::magic::TRZSZ_MAGIC_KEY;
use crate::transfer::protocol::{ProtocolMessage, Tag, TransferConfig, NEWLINE};

/// Drain never runs longer than this many quiet periods.
const MAX_DRAIN_PERIODS: u32 = 20;

// =============================================================================
// Host sinks
// =============================================================================

/// Receives bytes destined for the remote peer.
pub trait ServerWriter: Send + Sync {
    fn send_to_server(&self, data: &[u8]);
}

impl<F> ServerWriter for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn send_to_server(&self, data: &[u8]) {
        self(data)
    }
}

/// Receives bytes destined for the local terminal display.
pub trait TerminalWriter: Send + Sync {
    fn write_to_terminal(&self, data: &[u8]);
}

impl<F> TerminalWriter for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn write_to_terminal(&self, data: &[u8]) {
        self(data)
    }
}

// =============================================================================
// Channel types
// =============================================================================

/// Filter side of the inbound byte channel.
pub type InboundSender = mpsc::UnboundedSender<Bytes>;

/// Session side of the inbound byte channel.
pub type InboundReceiver = mpsc::UnboundedReceiver<Bytes>;

pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}

/// Create the cancellation flag shared by the filter and one session.
pub fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

// =============================================================================
// LineReader
// =============================================================================

/// Splits inbound chunks into lines.
pub struct LineReader {
    rx: InboundReceiver,
    cancel: watch::Receiver<bool>,
    pending: BytesMut,
}

impl LineReader {
    pub fn new(rx: InboundReceiver, cancel: watch::Receiver<bool>) -> Self {
        Self {
            rx,
            cancel,
            pending: BytesMut::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Next complete line, without its `\n` and any trailing `\r`.
    pub async fn read_line(&mut self, timeout: Option<Duration>, expected: &str) -> Result<String> {
        loop {
            if self.is_cancelled() {
                return Err(TransferError::UserCancelled);
            }
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            let chunk = match timeout {
                Some(limit) => tokio::time::timeout(limit, self.next_chunk())
                    .await
                    .map_err(|_| TransferError::Timeout {
                        expected: expected.to_string(),
                    })??,
                None => self.next_chunk().await?,
            };
            self.pending.extend_from_slice(&chunk);
        }
    }

    /// Swallow input until none has arrived for `quiet`.
    pub async fn drain(&mut self, quiet: Duration) {
        self.pending.clear();
        let deadline = Instant::now() + quiet * MAX_DRAIN_PERIODS;
        loop {
            match tokio::time::timeout(quiet, self.rx.recv()).await {
                Ok(Some(chunk)) => {
                    tracing::trace!("drained {} bytes", chunk.len());
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    /// Everything received but not yet consumed, without waiting for more.
    pub fn take_unread(&mut self) -> Vec<Bytes> {
        let mut unread = Vec::new();
        if !self.pending.is_empty() {
            unread.push(self.pending.split().freeze());
        }
        while let Ok(chunk) = self.rx.try_recv() {
            unread.push(chunk);
        }
        unread
    }

    fn take_line(&mut self) -> Option<String> {
        let idx = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line = self.pending.split_to(idx + 1);
        line.truncate(idx);
        if line.last() == Some(&b'\r') {
            line.truncate(idx - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    async fn next_chunk(&mut self) -> Result<Bytes> {
        tokio::select! {
            biased;
            _ = self.cancel.changed() => Err(TransferError::UserCancelled),
            chunk = self.rx.recv() => chunk.ok_or(TransferError::ChannelClosed),
        }
    }
}

// =============================================================================
// ProtocolChannel
// =============================================================================

/// Line-level protocol operations shared by both transfer directions.
pub struct ProtocolChannel {
    writer: Arc<dyn ServerWriter>,
    reader: LineReader,
    timeout: Option<Duration>,
    junk_tolerant: bool,
}

impl ProtocolChannel {
    pub fn new(writer: Arc<dyn ServerWriter>, reader: LineReader) -> Self {
        Self {
            writer,
            reader,
            timeout: None,
            junk_tolerant: false,
        }
    }

    /// Adopt the line timeout and junk handling the remote asked for.
    pub fn apply_config(&mut self, config: &TransferConfig) {
        self.timeout = config.timeout();
        self.junk_tolerant = config.tmux_output_junk;
    }

    pub fn is_cancelled(&self) -> bool {
        self.reader.is_cancelled()
    }

    pub async fn drain(&mut self, quiet: Duration) {
        self.reader.drain(quiet).await
    }

    pub fn take_unread(&mut self) -> Vec<Bytes> {
        self.reader.take_unread()
    }

    fn write(&self, msg: &ProtocolMessage) {
        tracing::debug!(tag = %msg.tag, len = msg.payload.len(), "send");
        self.writer
            .send_to_server(msg.encode(NEWLINE).as_bytes());
    }

    /// Send unless the session has been cancelled.
    pub fn send(&mut self, msg: ProtocolMessage) -> Result<()> {
        if self.is_cancelled() {
            return Err(TransferError::UserCancelled);
        }
        self.write(&msg);
        Ok(())
    }

    /// Send the closing `EXIT`/`fail`/`ACT` line regardless of cancellation.
    pub fn send_final(&mut self, msg: ProtocolMessage) {
        self.write(&msg);
    }

    pub fn send_integer(&mut self, tag: Tag, value: u64) -> Result<()> {
        self.send(ProtocolMessage::integer(tag, value))
    }

    pub fn send_binary(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        self.send(ProtocolMessage::binary(tag, data)?)
    }

    pub fn send_string(&mut self, tag: Tag, text: &str) -> Result<()> {
        self.send(ProtocolMessage::text(tag, text)?)
    }

    /// Next protocol line. Trigger lines from a second `trz`/`tsz` are
    /// skipped: the running session owns the stream until it ends.
    async fn recv_line(&mut self, expect: Tag, may_have_junk: bool) -> Result<String> {
        loop {
            let mut line = self.reader.read_line(self.timeout, expect.as_str()).await?;
            if self.junk_tolerant || may_have_junk {
                let marker = format!("#{}:", expect);
                if let Some(idx) = line.rfind(&marker) {
                    line.drain(..idx);
                } else if let Some(idx) = line.rfind('#') {
                    line.drain(..idx);
                }
            }
            if !line.starts_with('#') && line.contains(TRZSZ_MAGIC_KEY) {
                tracing::debug!("ignoring trigger during an active session");
                continue;
            }
            return Ok(line);
        }
    }

    /// Receive the next line and insist on its tag.
    pub async fn recv_check(&mut self, expect: Tag, may_have_junk: bool) -> Result<ProtocolMessage> {
        let line = self.recv_line(expect, may_have_junk).await?;
        let msg = ProtocolMessage::parse(&line)?;
        tracing::debug!(tag = %msg.tag, len = msg.payload.len(), "recv");
        if msg.tag == expect {
            return Ok(msg);
        }
        if msg.tag.is_failure() {
            let text = msg.decode_text().unwrap_or_else(|_| msg.payload.clone());
            return Err(TransferError::RemoteFail(text));
        }
        if msg.tag == Tag::Exit {
            let text = msg.decode_text().unwrap_or_else(|_| msg.payload.clone());
            return Err(TransferError::RemoteExit(text));
        }
        Err(TransferError::UnexpectedMessage {
            expected: expect.to_string(),
            actual: msg.tag.to_string(),
        })
    }

    pub async fn recv_integer(&mut self, tag: Tag) -> Result<u64> {
        self.recv_check(tag, false).await?.decode_integer()
    }

    pub async fn recv_binary(&mut self, tag: Tag) -> Result<Vec<u8>> {
        self.recv_check(tag, false).await?.decode_binary()
    }

    pub async fn recv_string(&mut self, tag: Tag, may_have_junk: bool) -> Result<String> {
        self.recv_check(tag, may_have_junk).await?.decode_text()
    }

    /// Await a `SUCC` carrying exactly `expected`.
    pub async fn check_integer(&mut self, expected: u64) -> Result<()> {
        let actual = self.recv_integer(Tag::Succ).await?;
        if actual != expected {
            return Err(TransferError::AckMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Await a `SUCC` echoing exactly `expected`.
    pub async fn check_binary(&mut self, expected: &[u8]) -> Result<()> {
        let actual = self.recv_binary(Tag::Succ).await?;
        if actual != expected {
            return Err(TransferError::AckMismatch {
                expected: hex_preview(expected),
                actual: hex_preview(&actual),
            });
        }
        Ok(())
    }
}

fn hex_preview(data: &[u8]) -> String {
    data.iter().take(16).map(|b| format!("{:02x}", b)).collect()
}
