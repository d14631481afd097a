//! Receive path of the chunked transfer engine.
//!
//! Mirrors the sender: every NAME, SIZE, DATA and MD5 is answered with a
//! SUCC right after it has been handled locally. The file being written is
//! held here so an aborted session can discard it.

use crate::config::ChecksumPolicy;
use crate::error::{Result, TransferError};
use crate::fs::{FileProvider, IncomingName, SaveTarget, SinkFile};
use crate::transfer::channel::ProtocolChannel;
use crate::transfer::progress::FileProgress;
use crate::transfer::protocol::Tag;

/// What happened to one received entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub local_name: String,
    /// False when the file failed its checksum and was discarded.
    pub verified: bool,
}

pub struct Receiver<'a> {
    channel: &'a mut ProtocolChannel,
    directory: bool,
    overwrite: bool,
    checksum_policy: ChecksumPolicy,
    current: Option<Box<dyn SinkFile>>,
}

impl<'a> Receiver<'a> {
    pub fn new(
        channel: &'a mut ProtocolChannel,
        directory: bool,
        overwrite: bool,
        checksum_policy: ChecksumPolicy,
    ) -> Self {
        Self {
            channel,
            directory,
            overwrite,
            checksum_policy,
            current: None,
        }
    }

    /// Receive one entry into `target`.
    pub async fn recv_file(
        &mut self,
        provider: &dyn FileProvider,
        target: &mut SaveTarget,
        progress: &mut dyn FileProgress,
    ) -> Result<ReceivedFile> {
        let text = self.channel.recv_string(Tag::Name, false).await?;
        let name = IncomingName::parse(&text, self.directory)?;
        let sink = provider
            .open_save_file(target, &name, self.overwrite)
            .await
            .map_err(TransferError::sink_io)?;
        let local_name = sink.local_name().to_string();
        let file_name = sink.file_name().to_string();
        let is_dir = sink.is_dir();
        self.current = Some(sink);

        self.channel.send_string(Tag::Succ, &local_name)?;
        progress.on_name(&file_name);

        if is_dir {
            self.close_current().await?;
            self.current = None;
            return Ok(ReceivedFile {
                local_name,
                verified: true,
            });
        }

        let size = self.channel.recv_integer(Tag::Size).await?;
        self.channel.send_integer(Tag::Succ, size)?;
        progress.on_size(size);

        let digest = self.recv_data(size, progress).await?;
        self.close_current().await?;

        let expected = self.channel.recv_binary(Tag::Md5).await?;
        if expected != digest {
            match self.checksum_policy {
                ChecksumPolicy::AbortSession => {
                    return Err(TransferError::ChecksumMismatch { file: file_name });
                }
                ChecksumPolicy::DiscardFile => {
                    tracing::warn!(file = %file_name, "checksum mismatch, discarding file");
                    self.discard_current().await;
                    self.channel.send_binary(Tag::Succ, &expected)?;
                    return Ok(ReceivedFile {
                        local_name,
                        verified: false,
                    });
                }
            }
        }
        self.channel.send_binary(Tag::Succ, &digest)?;
        self.current = None;

        tracing::debug!(file = %file_name, local = %local_name, size, "file received");
        Ok(ReceivedFile {
            local_name,
            verified: true,
        })
    }

    async fn recv_data(&mut self, size: u64, progress: &mut dyn FileProgress) -> Result<[u8; 16]> {
        let mut md5 = md5::Context::new();
        let mut step = 0u64;
        progress.on_step(step);

        while step < size {
            let data = self.channel.recv_binary(Tag::Data).await?;
            let len = data.len() as u64;
            if step + len > size {
                return Err(TransferError::Protocol(format!(
                    "received {} bytes for a {} byte file",
                    step + len,
                    size
                )));
            }
            let sink = self
                .current
                .as_mut()
                .ok_or_else(|| TransferError::Protocol("no open file for DATA".to_string()))?;
            sink.write(&data).await.map_err(TransferError::sink_io)?;
            self.channel.send_integer(Tag::Succ, len)?;

            md5.consume(&data);
            step += len;
            progress.on_step(step);
        }

        Ok(md5.compute().0)
    }

    async fn close_current(&mut self) -> Result<()> {
        if let Some(sink) = self.current.as_mut() {
            sink.close().await.map_err(TransferError::sink_io)?;
        }
        Ok(())
    }

    /// Remove the partially received file, if any.
    pub async fn discard_current(&mut self) {
        if let Some(mut sink) = self.current.take() {
            if let Err(e) = sink.discard().await {
                tracing::warn!(file = %sink.file_name(), "failed to discard: {:#}", e);
            }
        }
    }
}
