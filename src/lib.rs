//! Client side of the trzsz protocol: upload and download files through
//! the same byte stream as an interactive terminal session.
//!
//! Embed a [`TrzszFilter`] between the terminal and the remote shell and
//! feed it every byte flowing in either direction. See [`transfer`] for the
//! protocol engine and [`fs`] for the file access interface hosts provide.

pub mod config;
pub mod error;
pub mod filter;
pub mod fs;
pub mod logging;
pub mod transfer;

pub use config::{ChecksumPolicy, FilterConfig};
pub use error::{Result, TransferError};
pub use filter::TrzszFilter;
pub use fs::local::{LocalFileProvider, PathChooser, StaticChooser};
pub use fs::{FileProvider, IncomingName, SaveTarget, SinkFile, SourceFile};
pub use logging::{init_logging, LogFormat};
pub use transfer::{ServerWriter, SessionOutcome, TerminalWriter, TransferStatus};
