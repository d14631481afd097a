//! Send path of the chunked transfer engine.
//!
//! One call to [`Sender::send_file`] moves one entry: NAME, SIZE, the DATA
//! chunks and MD5, each followed by the remote's SUCC before anything else
//! goes out.

use std::time::{Duration, Instant};

use crate::error::{Result, TransferError};
use crate::fs::{PathEntry, SourceFile};
use crate::transfer::channel::ProtocolChannel;
use crate::transfer::progress::FileProgress;
use crate::transfer::protocol::Tag;

/// Size of the first DATA chunk of every session.
pub const INITIAL_CHUNK_SIZE: usize = 1024;

/// A full chunk acknowledged faster than this doubles the chunk size.
const FAST_ACK: Duration = Duration::from_millis(500);

/// A chunk taking at least this long resets the chunk size.
const SLOW_ACK: Duration = Duration::from_secs(2);

/// Adaptive DATA chunk sizing.
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    size: usize,
    max: usize,
}

impl ChunkSizer {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            size: INITIAL_CHUNK_SIZE.min(max),
            max,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Adjust after a chunk of `length` bytes took `elapsed` from send to ack.
    pub fn record(&mut self, length: usize, elapsed: Duration) {
        if length == self.size && elapsed < FAST_ACK {
            self.size = self.size.saturating_mul(2).min(self.max);
        } else if elapsed >= SLOW_ACK {
            self.size = INITIAL_CHUNK_SIZE.min(self.max);
        }
    }
}

pub struct Sender<'a> {
    channel: &'a mut ProtocolChannel,
    directory: bool,
    sizer: ChunkSizer,
}

impl<'a> Sender<'a> {
    /// `directory` selects JSON path entries instead of bare names in NAME.
    pub fn new(channel: &'a mut ProtocolChannel, directory: bool, max_chunk_size: usize) -> Self {
        Self {
            channel,
            directory,
            sizer: ChunkSizer::new(max_chunk_size),
        }
    }

    /// Send one entry and return the name the remote saved it under.
    pub async fn send_file(
        &mut self,
        file: &mut dyn SourceFile,
        progress: &mut dyn FileProgress,
    ) -> Result<String> {
        let name = if self.directory {
            serde_json::to_string(&PathEntry::from_source(file))
                .map_err(|e| TransferError::malformed(Tag::Name.as_str(), e))?
        } else {
            file.file_name().to_string()
        };
        self.channel.send_string(Tag::Name, &name)?;
        let remote_name = self.channel.recv_string(Tag::Succ, false).await?;
        progress.on_name(file.file_name());

        if file.is_dir() {
            tracing::debug!(name = %name, "sent directory entry");
            return Ok(remote_name);
        }

        let size = file.size();
        self.channel.send_integer(Tag::Size, size)?;
        self.channel.check_integer(size).await?;
        progress.on_size(size);

        let digest = self.send_data(file, size, progress).await?;
        self.channel.send_binary(Tag::Md5, &digest)?;
        self.channel.check_binary(&digest).await?;

        tracing::debug!(name = %file.file_name(), size, remote = %remote_name, "file sent");
        Ok(remote_name)
    }

    async fn send_data(
        &mut self,
        file: &mut dyn SourceFile,
        size: u64,
        progress: &mut dyn FileProgress,
    ) -> Result<[u8; 16]> {
        let mut md5 = md5::Context::new();
        let mut buf = Vec::new();
        let mut step = 0u64;
        progress.on_step(step);

        while step < size {
            let chunk = self.sizer.size();
            let want = chunk.min((size - step).min(usize::MAX as u64) as usize);
            buf.resize(want, 0);
            let n = file
                .read(&mut buf[..want])
                .await
                .map_err(TransferError::source_io)?;
            if n == 0 {
                return Err(TransferError::SourceIo {
                    message: format!(
                        "{} ended after {} of {} bytes",
                        file.file_name(),
                        step,
                        size
                    ),
                });
            }

            let started = Instant::now();
            self.channel.send_binary(Tag::Data, &buf[..n])?;
            self.channel.check_integer(n as u64).await?;
            self.sizer.record(n, started.elapsed());

            md5.consume(&buf[..n]);
            step += n as u64;
            progress.on_step(step);
        }

        Ok(md5.compute().0)
    }
}
