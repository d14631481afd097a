//! Transfer session state machine.
//!
//! A session is created by the filter on a trigger match and runs as one
//! tokio task until it reaches a terminal state. The status it publishes
//! is what the filter consults to decide where bytes go; it returns to
//! `Standby` only after the final line has been handed to the server sink.
//!
//! ```text
//! Standby -> Negotiating -> Transferring -> Completed -> Standby
//!                 |               |
//!                 +-> Declined    +-> Cancelling -> Standby (fail sent)
//! ```

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::FilterConfig;
use crate::error::{Result, TransferError};
use crate::fs::FileProvider;
use crate::transfer::channel::{ProtocolChannel, TerminalWriter};
use crate::transfer::magic::{TransferMode, Trigger};
use crate::transfer::progress::{FileProgress, TextProgressBar};
use crate::transfer::protocol::{ProtocolMessage, Tag, TransferAction, TransferConfig};
use crate::transfer::receiver::Receiver;
use crate::transfer::sender::Sender;

/// Where the filter currently routes bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// No session; everything passes through.
    Standby,
    Negotiating,
    Transferring,
    /// Draining leftover output before the final `fail` line.
    Cancelling,
}

impl TransferStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, TransferStatus::Standby)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// All files moved; `names` are the distinct names reported in EXIT.
    Completed { names: Vec<String> },
    /// The chooser returned nothing and `ACT confirm=false` was sent.
    Declined,
    Cancelled,
    Failed { reason: String },
}

/// Everything a session borrows from its filter.
#[derive(Clone)]
pub struct SessionEnv {
    pub provider: Arc<dyn FileProvider>,
    pub terminal: Arc<dyn TerminalWriter>,
    pub columns: Arc<AtomicUsize>,
    pub config: FilterConfig,
}

/// Aggregate byte counts, forwarded to the progress bar when there is one.
#[derive(Default)]
struct Tracker {
    bar: Option<TextProgressBar>,
    file_base: u64,
    bytes_expected: u64,
    bytes_transferred: u64,
}

impl FileProgress for Tracker {
    fn on_num(&mut self, count: usize) {
        if let Some(bar) = &mut self.bar {
            bar.on_num(count);
        }
    }

    fn on_name(&mut self, name: &str) {
        self.file_base = self.bytes_transferred;
        if let Some(bar) = &mut self.bar {
            bar.on_name(name);
        }
    }

    fn on_size(&mut self, size: u64) {
        self.bytes_expected += size;
        if let Some(bar) = &mut self.bar {
            bar.on_size(size);
        }
    }

    fn on_step(&mut self, step: u64) {
        self.bytes_transferred = self.file_base + step;
        if let Some(bar) = &mut self.bar {
            bar.on_step(step);
        }
    }
}

pub struct TransferSession {
    trigger: Trigger,
    channel: ProtocolChannel,
    env: SessionEnv,
    status: watch::Sender<TransferStatus>,
    file_count: usize,
    current_file_index: usize,
    tracker: Tracker,
}

impl TransferSession {
    pub fn new(
        trigger: Trigger,
        channel: ProtocolChannel,
        env: SessionEnv,
        status: watch::Sender<TransferStatus>,
    ) -> Self {
        Self {
            trigger,
            channel,
            env,
            status,
            file_count: 0,
            current_file_index: 0,
            tracker: Tracker::default(),
        }
    }

    /// Drive the session to completion.
    pub async fn run(mut self) -> SessionOutcome {
        tracing::info!(
            mode = ?self.trigger.mode,
            direction = ?self.trigger.mode.direction(),
            version = %self.trigger.version,
            "transfer session started"
        );
        self.status.send_replace(TransferStatus::Negotiating);

        let result = match self.trigger.mode {
            TransferMode::Download => self.download().await,
            TransferMode::Upload => self.upload(false).await,
            TransferMode::UploadDirectory => self.upload(true).await,
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => self.abort(err).await,
        };

        self.release();
        tracing::info!(
            files = self.file_count,
            index = self.current_file_index,
            bytes = self.tracker.bytes_transferred,
            expected = self.tracker.bytes_expected,
            outcome = ?outcome,
            "transfer session finished"
        );
        outcome
    }

    async fn upload(&mut self, directory: bool) -> Result<SessionOutcome> {
        let chosen = self
            .env
            .provider
            .choose_send_files(directory)
            .await
            .map_err(TransferError::source_io)?;
        let mut files = match chosen {
            Some(files) if !files.is_empty() => files,
            _ => return self.decline(),
        };

        self.send_action()?;
        let config = self.recv_config().await?;
        self.start_transfer(&config);

        self.file_count = files.len();
        let count = files.len() as u64;
        self.channel.send_integer(Tag::Num, count)?;
        self.channel.check_integer(count).await?;
        self.tracker.on_num(self.file_count);

        let max_chunk = config.max_chunk_size(self.env.config.max_chunk_size);
        let mut sender = Sender::new(&mut self.channel, config.directory, max_chunk);
        let mut names: Vec<String> = Vec::new();
        for (idx, file) in files.iter_mut().enumerate() {
            self.current_file_index = idx;
            let result = sender.send_file(file.as_mut(), &mut self.tracker).await;
            file.close().await;
            let remote_name = result?;
            if !names.contains(&remote_name) {
                names.push(remote_name);
            }
        }

        let message = format_saved_files(&names, None);
        self.finish(&message)?;
        Ok(SessionOutcome::Completed { names })
    }

    async fn download(&mut self) -> Result<SessionOutcome> {
        let chosen = self
            .env
            .provider
            .choose_save_directory()
            .await
            .map_err(TransferError::sink_io)?;
        let Some(mut target) = chosen else {
            return self.decline();
        };

        self.send_action()?;
        let config = self.recv_config().await?;
        self.start_transfer(&config);

        let count = self.channel.recv_integer(Tag::Num).await?;
        self.channel.send_integer(Tag::Succ, count)?;
        self.file_count = usize::try_from(count)
            .map_err(|_| TransferError::Protocol(format!("too many files: {}", count)))?;
        self.tracker.on_num(self.file_count);

        let mut receiver = Receiver::new(
            &mut self.channel,
            config.directory,
            config.overwrite,
            self.env.config.checksum_policy,
        );
        let mut names: Vec<String> = Vec::new();
        let mut discarded: Vec<String> = Vec::new();
        for idx in 0..self.file_count {
            self.current_file_index = idx;
            let received = match receiver
                .recv_file(self.env.provider.as_ref(), &mut target, &mut self.tracker)
                .await
            {
                Ok(received) => received,
                Err(err) => {
                    receiver.discard_current().await;
                    return Err(err);
                }
            };
            let list = if received.verified {
                &mut names
            } else {
                &mut discarded
            };
            if !list.contains(&received.local_name) {
                list.push(received.local_name);
            }
        }

        let mut message = format_saved_files(&names, Some(&target.display));
        if !discarded.is_empty() {
            message.push_str(&format_discarded_files(&discarded));
        }
        self.finish(&message)?;
        Ok(SessionOutcome::Completed { names })
    }

    fn send_action(&mut self) -> Result<()> {
        let action = TransferAction::new(true).to_json()?;
        self.channel.send_string(Tag::Act, &action)
    }

    /// The chooser came back empty: refuse the transfer and stop.
    fn decline(&mut self) -> Result<SessionOutcome> {
        if self.channel.is_cancelled() {
            return Err(TransferError::UserCancelled);
        }
        let action = TransferAction::new(false).to_json()?;
        let msg = ProtocolMessage::text(Tag::Act, &action)?;
        tracing::info!("transfer declined by chooser");
        self.channel.send_final(msg);
        self.release();
        Ok(SessionOutcome::Declined)
    }

    async fn recv_config(&mut self) -> Result<TransferConfig> {
        let json = self.channel.recv_string(Tag::Cfg, true).await?;
        let config = TransferConfig::from_json(&json)?;
        tracing::debug!(?config, "received transfer config");
        self.channel.apply_config(&config);
        Ok(config)
    }

    fn start_transfer(&mut self, config: &TransferConfig) {
        if self.env.config.show_progress && !config.quiet {
            self.tracker.bar = Some(TextProgressBar::new(
                self.env.terminal.clone(),
                self.env.columns.clone(),
                config.tmux_pane_width,
            ));
        }
        self.status.send_replace(TransferStatus::Transferring);
    }

    fn finish(&mut self, message: &str) -> Result<()> {
        if self.channel.is_cancelled() {
            return Err(TransferError::UserCancelled);
        }
        let msg = ProtocolMessage::text(Tag::Exit, message)?;
        self.channel.send_final(msg);
        self.release();
        Ok(())
    }

    /// Return the byte streams to the filter. Output that was queued for
    /// the session but never read goes to the terminal.
    fn release(&mut self) {
        self.status.send_replace(TransferStatus::Standby);
        for chunk in self.channel.take_unread() {
            self.env.terminal.write_to_terminal(&chunk);
        }
    }

    async fn abort(&mut self, err: TransferError) -> SessionOutcome {
        self.status.send_replace(TransferStatus::Cancelling);
        if err.is_cancellation() {
            tracing::info!("transfer stopped by user");
        } else {
            tracing::warn!(error = %err, "transfer failed");
        }

        self.channel.drain(self.env.config.clean_timeout()).await;

        if !err.is_remote() {
            match ProtocolMessage::text(Tag::Fail, &err.to_string()) {
                Ok(msg) => self.channel.send_final(msg),
                Err(e) => tracing::warn!("cannot encode fail message: {}", e),
            }
        }
        self.release();

        if err.is_cancellation() {
            SessionOutcome::Cancelled
        } else {
            SessionOutcome::Failed {
                reason: err.to_string(),
            }
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count > 1 {
        "files/directories"
    } else {
        "file/directory"
    }
}

/// EXIT text: `Saved <n> file/directory[ to <dir>]` then one `- name` line per entry.
pub fn format_saved_files(names: &[String], dest: Option<&str>) -> String {
    let mut message = format!("Saved {} {}", names.len(), plural(names.len()));
    if let Some(dest) = dest {
        message.push_str(" to ");
        message.push_str(dest);
    }
    for name in names {
        message.push_str("\r\n- ");
        message.push_str(name);
    }
    message
}

fn format_discarded_files(names: &[String]) -> String {
    let mut message = format!(
        "\r\nDiscarded {} {} with bad MD5",
        names.len(),
        plural(names.len())
    );
    for name in names {
        message.push_str("\r\n- ");
        message.push_str(name);
    }
    message
}
