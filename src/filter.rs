//! Terminal I/O filter.
//!
//! The host routes every byte between the terminal and the remote shell
//! through a [`TrzszFilter`]. While no transfer is running everything
//! passes straight through; once a trigger shows up in the remote output a
//! session task takes over the remote output and local input is swallowed
//! until the session ends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::FilterConfig;
use crate::error::{Result, TransferError};
use crate::fs::FileProvider;
use crate::transfer::channel::{
    cancel_channel, inbound_channel, InboundSender, LineReader, ProtocolChannel, ServerWriter,
    TerminalWriter,
};
use crate::transfer::magic::{scan_trigger, Trigger};
use crate::transfer::session::{SessionEnv, SessionOutcome, TransferSession, TransferStatus};

/// Key that stops a running transfer.
pub const CANCEL_KEY: &str = "\x03";

/// How many trigger ids are remembered for duplicate detection.
const MAX_SEEN_IDS: usize = 100;

struct SessionHandle {
    inbound: InboundSender,
    cancel: watch::Sender<bool>,
    status: watch::Receiver<TransferStatus>,
    task: JoinHandle<SessionOutcome>,
}

pub struct TrzszFilter {
    terminal: Arc<dyn TerminalWriter>,
    server: Arc<dyn ServerWriter>,
    provider: Arc<dyn FileProvider>,
    config: FilterConfig,
    columns: Arc<AtomicUsize>,
    runtime: Handle,
    session: Option<SessionHandle>,
    seen_ids: VecDeque<String>,
}

impl TrzszFilter {
    /// Create a filter. Must be called from within a tokio runtime; sessions
    /// are spawned on it.
    pub fn new(
        terminal: impl TerminalWriter + 'static,
        server: impl ServerWriter + 'static,
        provider: impl FileProvider + 'static,
        config: FilterConfig,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| TransferError::Config(format!("no tokio runtime: {}", e)))?;
        Ok(Self {
            terminal: Arc::new(terminal),
            server: Arc::new(server),
            provider: Arc::new(provider),
            columns: Arc::new(AtomicUsize::new(config.terminal_columns)),
            config,
            runtime,
            session: None,
            seen_ids: VecDeque::new(),
        })
    }

    /// Handle output from the remote shell.
    pub fn process_server_output(&mut self, output: impl AsRef<[u8]>) {
        let output = output.as_ref();
        if self.is_transferring() {
            if let Some(session) = &self.session {
                if session.inbound.send(Bytes::copy_from_slice(output)).is_ok() {
                    return;
                }
            }
        }

        let Some(found) = scan_trigger(output) else {
            self.terminal.write_to_terminal(output);
            return;
        };
        if self.is_duplicate(&found.trigger) {
            tracing::debug!(id = ?found.trigger.unique_id, "ignoring repeated trigger");
            self.terminal.write_to_terminal(output);
            return;
        }

        self.terminal.write_to_terminal(output);
        self.start_session(found.trigger);
    }

    /// Handle keystrokes from the user.
    pub fn process_terminal_input(&mut self, input: &str) {
        if self.is_transferring() {
            if input == CANCEL_KEY {
                self.stop_transferring_files();
            }
            return;
        }
        self.server.send_to_server(input.as_bytes());
    }

    /// Handle non-text input such as mouse reports.
    pub fn process_binary_input(&mut self, input: &[u8]) {
        if self.is_transferring() {
            return;
        }
        self.server.send_to_server(input);
    }

    /// Takes effect on the next progress redraw, even mid-transfer.
    pub fn set_terminal_columns(&self, columns: usize) {
        self.columns.store(columns.max(1), Ordering::Relaxed);
    }

    pub fn terminal_columns(&self) -> usize {
        self.columns.load(Ordering::Relaxed)
    }

    pub fn is_transferring(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.status.borrow().is_active())
    }

    /// Ask the running session to stop. Does nothing when idle.
    pub fn stop_transferring_files(&self) {
        if !self.is_transferring() {
            return;
        }
        if let Some(session) = &self.session {
            tracing::debug!("stop requested");
            session.cancel.send_replace(true);
        }
    }

    /// Wait for the most recent session to end and return how it ended.
    pub async fn join_session(&mut self) -> Option<SessionOutcome> {
        let handle = self.session.as_mut()?;
        let outcome = match (&mut handle.task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("transfer session task failed: {}", e);
                SessionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        self.session = None;
        Some(outcome)
    }

    fn is_duplicate(&mut self, trigger: &Trigger) -> bool {
        if !self.config.dedupe_unique_ids || !trigger.is_dedupable() {
            return false;
        }
        let Some(id) = trigger.unique_id.as_ref() else {
            return false;
        };
        if self.seen_ids.contains(id) {
            return true;
        }
        if self.seen_ids.len() >= MAX_SEEN_IDS {
            self.seen_ids.pop_front();
        }
        self.seen_ids.push_back(id.clone());
        false
    }

    fn start_session(&mut self, trigger: Trigger) {
        let (inbound, rx) = inbound_channel();
        let (cancel, cancel_rx) = cancel_channel();
        let (status_tx, status) = watch::channel(TransferStatus::Negotiating);

        let channel = ProtocolChannel::new(self.server.clone(), LineReader::new(rx, cancel_rx));
        let env = SessionEnv {
            provider: self.provider.clone(),
            terminal: self.terminal.clone(),
            columns: self.columns.clone(),
            config: self.config.clone(),
        };
        let session = TransferSession::new(trigger, channel, env, status_tx);
        let task = self.runtime.spawn(session.run());

        self.session = Some(SessionHandle {
            inbound,
            cancel,
            status,
            task,
        });
    }
}
