//! Line protocol for trzsz transfers.
//!
//! Every message is a single line `#<TAG>:<payload>` terminated by the
//! protocol newline. Counts and sizes travel as plain decimal ASCII; every
//! other payload is zlib-compressed and then base64-encoded so the line can
//! cross any terminal without control bytes or embedded newlines.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

/// Protocol version announced in the ACT message.
pub const PROTOCOL_VERSION: &str = "1.1.5";

/// Language marker announced in the ACT message.
pub const PROTOCOL_LANG: &str = "rs";

/// Terminator of every line the client sends.
pub const NEWLINE: &str = "\n";

/// Upper bound for an inflated payload (64MB) - guards against zlib bombs.
pub const MAX_DECODED_SIZE: u64 = 64 * 1024 * 1024;

// =============================================================================
// Tags
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Act,
    Cfg,
    Num,
    Name,
    Size,
    Data,
    Md5,
    Succ,
    Exit,
    /// Error report without traceback.
    Fail,
    /// Error report with traceback, only ever sent by remote servers.
    FailTrace,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Act => "ACT",
            Tag::Cfg => "CFG",
            Tag::Num => "NUM",
            Tag::Name => "NAME",
            Tag::Size => "SIZE",
            Tag::Data => "DATA",
            Tag::Md5 => "MD5",
            Tag::Succ => "SUCC",
            Tag::Exit => "EXIT",
            Tag::Fail => "fail",
            Tag::FailTrace => "FAIL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACT" => Some(Tag::Act),
            "CFG" => Some(Tag::Cfg),
            "NUM" => Some(Tag::Num),
            "NAME" => Some(Tag::Name),
            "SIZE" => Some(Tag::Size),
            "DATA" => Some(Tag::Data),
            "MD5" => Some(Tag::Md5),
            "SUCC" => Some(Tag::Succ),
            "EXIT" => Some(Tag::Exit),
            "fail" => Some(Tag::Fail),
            "FAIL" => Some(Tag::FailTrace),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Tag::Fail | Tag::FailTrace)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payload encoding
// =============================================================================

/// Compress and base64-encode an opaque payload.
pub fn encode_buffer(data: &[u8]) -> Result<String> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| TransferError::Protocol(format!("compress failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| TransferError::Protocol(format!("compress failed: {}", e)))?;
    Ok(STANDARD.encode(compressed))
}

/// Reverse of [`encode_buffer`].
pub fn decode_buffer(encoded: &str) -> Result<Vec<u8>> {
    inflate(encoded).map_err(|message| TransferError::malformed("binary", message))
}

fn inflate(encoded: &str) -> std::result::Result<Vec<u8>, String> {
    let compressed = STANDARD
        .decode(encoded.trim_end())
        .map_err(|e| format!("base64: {}", e))?;
    let mut out = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(MAX_DECODED_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|e| format!("inflate: {}", e))?;
    if out.len() as u64 > MAX_DECODED_SIZE {
        return Err(format!("inflated payload exceeds {} bytes", MAX_DECODED_SIZE));
    }
    Ok(out)
}

fn parse_integer(payload: &str) -> std::result::Result<u64, String> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("not a decimal integer: {:?}", payload));
    }
    payload.parse::<u64>().map_err(|e| e.to_string())
}

// =============================================================================
// Messages
// =============================================================================

/// One protocol line: a tag plus its still-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub tag: Tag,
    pub payload: String,
}

impl ProtocolMessage {
    pub fn integer(tag: Tag, value: u64) -> Self {
        Self {
            tag,
            payload: value.to_string(),
        }
    }

    pub fn binary(tag: Tag, data: &[u8]) -> Result<Self> {
        Ok(Self {
            tag,
            payload: encode_buffer(data)?,
        })
    }

    pub fn text(tag: Tag, text: &str) -> Result<Self> {
        Self::binary(tag, text.as_bytes())
    }

    /// Frame the message as a wire line.
    pub fn encode(&self, newline: &str) -> String {
        format!("#{}:{}{}", self.tag, self.payload, newline)
    }

    /// Parse a line with its terminator already stripped.
    pub fn parse(line: &str) -> Result<Self> {
        let body = line
            .strip_prefix('#')
            .ok_or_else(|| TransferError::Protocol(format!("not a protocol line: {:?}", line)))?;
        let colon = match body.find(':') {
            Some(idx) if idx > 0 => idx,
            _ => {
                return Err(TransferError::Protocol(format!(
                    "protocol line without tag: {:?}",
                    line
                )))
            }
        };
        let tag = Tag::parse(&body[..colon]).ok_or_else(|| {
            TransferError::Protocol(format!("unknown tag: {:?}", &body[..colon]))
        })?;
        Ok(Self {
            tag,
            payload: body[colon + 1..].to_string(),
        })
    }

    pub fn decode_integer(&self) -> Result<u64> {
        parse_integer(&self.payload).map_err(|m| TransferError::malformed(self.tag.as_str(), m))
    }

    pub fn decode_binary(&self) -> Result<Vec<u8>> {
        inflate(&self.payload).map_err(|m| TransferError::malformed(self.tag.as_str(), m))
    }

    pub fn decode_text(&self) -> Result<String> {
        let bytes = self.decode_binary()?;
        String::from_utf8(bytes).map_err(|e| TransferError::malformed(self.tag.as_str(), e))
    }
}

// =============================================================================
// ACT / CFG documents
// =============================================================================

/// Body of the ACT message the client sends after a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAction {
    pub lang: String,
    pub confirm: bool,
    pub version: String,
    pub support_dir: bool,
    /// `false` keeps the remote in text (deflate + base64) mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<bool>,
}

impl TransferAction {
    pub fn new(confirm: bool) -> Self {
        Self {
            lang: PROTOCOL_LANG.to_string(),
            confirm,
            version: PROTOCOL_VERSION.to_string(),
            support_dir: true,
            binary: Some(false),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TransferError::malformed(Tag::Act.as_str(), e))
    }
}

/// Options the remote sends in the CFG message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub lang: Option<String>,
    pub quiet: bool,
    pub binary: bool,
    pub directory: bool,
    pub overwrite: bool,
    /// Seconds to wait for each line; `0` or absent means no limit.
    pub timeout: Option<u64>,
    /// Largest DATA chunk the remote accepts.
    pub bufsize: Option<u64>,
    pub tmux_output_junk: bool,
    pub tmux_pane_width: Option<u16>,
}

impl TransferConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TransferError::malformed(Tag::Cfg.as_str(), e))
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        match self.timeout {
            Some(secs) if secs > 0 => Some(std::time::Duration::from_secs(secs)),
            _ => None,
        }
    }

    /// Chunk size ceiling given the local limit.
    pub fn max_chunk_size(&self, local_limit: u64) -> usize {
        let limit = match self.bufsize {
            Some(remote) if remote > 0 => remote.min(local_limit),
            _ => local_limit,
        };
        limit.max(1) as usize
    }
}

// =============================================================================
// Tests
// =============================================================================
