//! trzsz transfer engine.
//!
//! A transfer is tunnelled through the interactive byte stream as
//! newline-terminated `#TAG:payload` lines. Every message the sending side
//! emits is acknowledged with a `SUCC` line before the next one goes out.
//!
//! # Architecture
//!
//! ```text
//! remote output --> Filter --(idle)--> magic scan --> terminal
//!                     |
//!                     +--(active)--> LineReader --> Session --> Sender / Receiver
//!                                                      |              |
//! remote input  <-------------------- ProtocolChannel <+--------------+
//!                                                      |
//!                                                      +--> TextProgressBar --> terminal
//! ```
//!
//! # Message flow (upload, remote ran `trz`)
//!
//! 1. ACT (ours) and CFG (theirs)
//! 2. NUM, then per file NAME, SIZE, DATA..., MD5, each answered by SUCC
//! 3. EXIT with a summary, or `fail` with the reason

pub mod channel;
pub mod magic;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;

pub use channel::{ServerWriter, TerminalWriter};
pub use magic::{find_magic_key, scan_trigger, Direction, TransferMode, Trigger, TriggerMatch};
pub use progress::{render_progress_line, FileProgress, ProgressSnapshot, TextProgressBar};
pub use protocol::{
    decode_buffer, encode_buffer, ProtocolMessage, Tag, TransferAction, TransferConfig,
    PROTOCOL_VERSION,
};
pub use receiver::{ReceivedFile, Receiver};
pub use sender::{ChunkSizer, Sender};
pub use session::{format_saved_files, SessionOutcome, TransferSession, TransferStatus};
