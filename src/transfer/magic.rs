//! Trigger detection in remote output.
//!
//! A remote `trz`/`tsz` announces itself by printing
//! `::TRZSZ:TRANSFER:<mode>:<version>[:<unique id>]`. Terminal output often
//! carries stale copies of that text (an echoed command line, a log being
//! `cat`ed), so the last occurrence in a chunk is the one that counts.

use std::sync::OnceLock;

use regex::bytes::Regex;

use crate::error::{Result, TransferError};

/// Literal prefix of every trigger.
pub const TRZSZ_MAGIC_KEY: &str = "::TRZSZ:TRANSFER:";

/// Bytes after a key occurrence that are examined for a trigger.
const MAX_TRIGGER_LEN: usize = 128;

/// What the remote asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// `S`: remote sends, we save.
    Download,
    /// `R`: remote receives files we pick.
    Upload,
    /// `D`: remote receives a directory tree we pick.
    UploadDirectory,
}

/// Direction of file data relative to the local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to remote.
    Sending,
    /// Remote to client.
    Receiving,
}

impl TransferMode {
    fn from_char(c: &str) -> Option<Self> {
        match c {
            "S" => Some(Self::Download),
            "R" => Some(Self::Upload),
            "D" => Some(Self::UploadDirectory),
            _ => None,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::Download => Direction::Receiving,
            Self::Upload | Self::UploadDirectory => Direction::Sending,
        }
    }
}

/// A structurally valid trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub mode: TransferMode,
    pub version: String,
    pub unique_id: Option<String>,
}

/// A trigger together with the output text from its start to the end of the chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    pub trigger: Trigger,
    pub text: String,
}

fn trigger_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^::TRZSZ:TRANSFER:([SRD]):(\d+(?:\.\d+)*)(?::(\d+))?")
            .expect("trigger regex is valid")
    })
}

impl Trigger {
    /// Parse text that starts with [`TRZSZ_MAGIC_KEY`].
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_bytes(text.as_bytes())
    }

    fn parse_bytes(text: &[u8]) -> Result<Self> {
        let caps = trigger_regex().captures(text).ok_or_else(|| {
            let head = &text[..text.len().min(64)];
            TransferError::MalformedTrigger(String::from_utf8_lossy(head).into_owned())
        })?;
        let field = |i: usize| {
            caps.get(i)
                .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
        };
        let mode_char = field(1).unwrap_or_default();
        let mode = TransferMode::from_char(&mode_char)
            .ok_or(TransferError::MalformedTrigger(mode_char))?;
        Ok(Self {
            mode,
            version: field(2).unwrap_or_default(),
            unique_id: field(3),
        })
    }

    /// Whether a repeat of this trigger should be treated as stale output.
    ///
    /// Short ids and ids ending in `00` are not unique per invocation.
    pub fn is_dedupable(&self) -> bool {
        self.unique_id
            .as_deref()
            .is_some_and(|id| id.len() >= 8 && !id.ends_with("00"))
    }
}

/// Position of the last `needle` lying entirely inside `haystack[..end]`.
fn rfind_before(haystack: &[u8], needle: &[u8], end: usize) -> Option<usize> {
    let end = end.min(haystack.len());
    if needle.is_empty() || end < needle.len() {
        return None;
    }
    haystack[..end].windows(needle.len()).rposition(|w| w == needle)
}

/// Text from the last literal magic key to the end of `output`.
///
/// Accepts anything byte-like: `&str`, `&[u8]`, sub-slices, `Bytes`. A slice
/// that cuts into the key yields `None`.
pub fn find_magic_key(output: impl AsRef<[u8]>) -> Option<String> {
    let bytes = output.as_ref();
    let idx = rfind_before(bytes, TRZSZ_MAGIC_KEY.as_bytes(), bytes.len())?;
    Some(String::from_utf8_lossy(&bytes[idx..]).into_owned())
}

/// Last occurrence of the magic key that is also a well-formed trigger.
///
/// Occurrences are examined from the end backwards without overlap, each
/// against a bounded window, so one call is linear in the chunk length. A
/// malformed occurrence is skipped as ordinary output.
pub fn scan_trigger(output: impl AsRef<[u8]>) -> Option<TriggerMatch> {
    let bytes = output.as_ref();
    let key = TRZSZ_MAGIC_KEY.as_bytes();
    let mut end = bytes.len();
    while let Some(idx) = rfind_before(bytes, key, end) {
        let window = &bytes[idx..bytes.len().min(idx + MAX_TRIGGER_LEN)];
        match Trigger::parse_bytes(window) {
            Ok(trigger) => {
                return Some(TriggerMatch {
                    trigger,
                    text: String::from_utf8_lossy(&bytes[idx..]).into_owned(),
                })
            }
            Err(e) => tracing::trace!("ignoring trigger-like output: {}", e),
        }
        end = idx;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    const GOOD: &str = "::TRZSZ:TRANSFER";
    const FAIL: &str = "::TRZSZ:TRANSFEX";
    const SUFFIX: &str = ":X:1.0.0:0";

    fn check_find(output: &str, expected: Option<&str>) {
        let expected = expected.map(str::to_string);
        assert_eq!(find_magic_key(output), expected);
        assert_eq!(find_magic_key(output.as_bytes()), expected);
        assert_eq!(find_magic_key(Bytes::copy_from_slice(output.as_bytes())), expected);
        assert_eq!(find_magic_key(output.as_bytes().to_vec()), expected);
    }

    #[test]
    fn test_find_magic_key() {
        let good = format!("{}{}", GOOD, SUFFIX);
        check_find("ABC", None);
        check_find(&"A::".repeat(10), None);
        check_find(&format!("{}{}", FAIL, SUFFIX), None);
        check_find(&good, Some(&good));
        check_find(&format!("A:A{}{}", FAIL, SUFFIX), None);
        check_find(&format!("A:A{}", good), Some(&good));
        check_find(&format!(":::{}{}", FAIL, SUFFIX), None);
        check_find(&format!(":::{}", good), Some(&good));
        check_find(
            &format!(":::{}:::{}1", good, good),
            Some(&format!("{}1", good)),
        );
    }

    #[test]
    fn test_find_magic_key_in_sub_slice() {
        let buf = format!("AAA{}{}", GOOD, SUFFIX).into_bytes();
        assert_eq!(
            find_magic_key(&buf[3..]),
            Some(format!("{}{}", GOOD, SUFFIX))
        );
        assert_eq!(find_magic_key(&buf[23..]), None);
    }

    #[test]
    fn test_parse_trigger() {
        let m = scan_trigger("::TRZSZ:TRANSFER:R:1.0.0:0").unwrap();
        assert_eq!(m.trigger.mode, TransferMode::Upload);
        assert_eq!(m.trigger.mode.direction(), Direction::Sending);
        assert_eq!(m.trigger.version, "1.0.0");
        assert_eq!(m.trigger.unique_id.as_deref(), Some("0"));
        assert_eq!(m.text, "::TRZSZ:TRANSFER:R:1.0.0:0");

        let m = scan_trigger("$ tsz a.txt\r\n::TRZSZ:TRANSFER:S:1.1.5:1697512345678\r\n").unwrap();
        assert_eq!(m.trigger.mode, TransferMode::Download);
        assert_eq!(m.trigger.mode.direction(), Direction::Receiving);
        assert_eq!(m.trigger.unique_id.as_deref(), Some("1697512345678"));
        assert!(m.text.ends_with("\r\n"));

        let m = scan_trigger("::TRZSZ:TRANSFER:D:1.1.5").unwrap();
        assert_eq!(m.trigger.mode, TransferMode::UploadDirectory);
        assert_eq!(m.trigger.unique_id, None);
    }

    #[test]
    fn test_malformed_trigger_is_no_match() {
        assert!(scan_trigger(format!("{}{}", GOOD, SUFFIX)).is_none());
        assert!(scan_trigger("::TRZSZ:TRANSFER:R:\n").is_none());
        assert!(scan_trigger("::TRZSZ:TRANSFER:R:x.y:1").is_none());
        assert!(matches!(
            Trigger::parse("::TRZSZ:TRANSFER:Q:1.0.0:1"),
            Err(TransferError::MalformedTrigger(_))
        ));
    }

    #[test]
    fn test_scan_skips_trailing_malformed_copy() {
        let out = "::TRZSZ:TRANSFER:S:1.0.0:1234\r\n::TRZSZ:TRANSFER:R:\r\n";
        let m = scan_trigger(out).unwrap();
        assert_eq!(m.trigger.mode, TransferMode::Download);
        assert_eq!(m.text, out);
    }

    #[test]
    fn test_scan_large_malformed_chunk_is_linear() {
        let mut out = "::TRZSZ:TRANSFER:Q:".repeat(100_000);
        let started = std::time::Instant::now();
        assert!(scan_trigger(&out).is_none());
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "scan took {:?}",
            started.elapsed()
        );

        out.insert_str(0, "::TRZSZ:TRANSFER:S:1.0.0:42\r\n");
        let m = scan_trigger(&out).unwrap();
        assert_eq!(m.trigger.unique_id.as_deref(), Some("42"));
        assert_eq!(m.text.len(), out.len());
    }

    #[test]
    fn test_dedupable_ids() {
        let parse = |s: &str| Trigger::parse(s).unwrap();
        assert!(parse("::TRZSZ:TRANSFER:S:1.0.0:1697512345678").is_dedupable());
        assert!(!parse("::TRZSZ:TRANSFER:S:1.0.0:1697512345600").is_dedupable());
        assert!(!parse("::TRZSZ:TRANSFER:S:1.0.0:0").is_dedupable());
        assert!(!parse("::TRZSZ:TRANSFER:S:1.0.0").is_dedupable());
    }

    proptest! {
        #[test]
        fn prop_plain_output_has_no_match(s in "[a-zA-Z0-9:. \r\n#]{0,256}") {
            prop_assume!(!s.contains(TRZSZ_MAGIC_KEY));
            prop_assert!(find_magic_key(&s).is_none());
            prop_assert!(scan_trigger(&s).is_none());
        }

        #[test]
        fn prop_last_trigger_wins(
            a in "[a-z :]{0,32}",
            b in "[a-z :]{0,32}",
            first in 0u64..1_000_000,
            second in 0u64..1_000_000,
        ) {
            let tail = format!("::TRZSZ:TRANSFER:S:1.0.0:{}", second);
            let out = format!("{}::TRZSZ:TRANSFER:R:1.0.0:{}{}{}", a, first, b, tail);
            let m = scan_trigger(&out).unwrap();
            prop_assert_eq!(m.text, tail);
            prop_assert_eq!(m.trigger.unique_id, Some(second.to_string()));
        }
    }
}
