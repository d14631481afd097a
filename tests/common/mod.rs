//! Shared helpers for the filter integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trzsz_filter::transfer::{ProtocolMessage, Tag, TransferAction};
use trzsz_filter::{FilterConfig, LocalFileProvider, PathChooser, StaticChooser, TrzszFilter};

/// `{"lang": "py", "bufsize": 1048576, "timeout": 100}`
pub const UPLOAD_CFG: &str =
    "#CFG:eJyrVspJzEtXslJQKqhU0lFQSipNK86sSgUKGBqYWJiamwHFSjJzU/NLS8BiBrUAcT0OOQ==\n";

/// Same as [`UPLOAD_CFG`] plus `"tmux_output_junk": true`.
pub const DOWNLOAD_CFG: &str = "#CFG:eJyrVspJzEtXslJQKqhU0lFQSipNK86sSgUKGBqYWJiamwHFSjJzU/NLS8BiBiB+bmlFPFCgoLQkPqs0LxsoUVJUmloLAF6AF9g=\n";

/// `test.txt`
pub const NAME_TEST_TXT: &str = "#NAME:eJwrSS0u0SupKAEADtkDTw==\n";

/// `test content\n`
pub const DATA_TEST_CONTENT: &str = "#DATA:eJwrSS0uUUjOzytJzSvhAgAkDwTm\n";

/// MD5 of `test content\n`.
pub const MD5_TEST_CONTENT: &str = "#MD5:eJy79tqIQ6ZJ72rRdtb0pty5cwE+YAdb\n";

pub const TEST_CONTENT: &[u8] = b"test content\n";

/// Records every call made to a host sink.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Recorder {
    pub fn sink(&self) -> impl Fn(&[u8]) + Send + Sync + 'static {
        let calls = self.calls.clone();
        move |data: &[u8]| calls.lock().unwrap().push(data.to_vec())
    }

    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Wait until at least `n` calls were recorded.
    pub async fn wait_for_len(&self, n: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "expected {} calls, got {:?}",
            n,
            self.lines()
        );
    }
}

/// Chooser that counts how often it was asked.
#[derive(Clone)]
pub struct CountingChooser {
    inner: StaticChooser,
    calls: Arc<AtomicUsize>,
}

impl CountingChooser {
    pub fn new(inner: StaticChooser) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PathChooser for CountingChooser {
    async fn choose_send_paths(&self, directory: bool) -> anyhow::Result<Option<Vec<PathBuf>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.choose_send_paths(directory).await
    }

    async fn choose_save_directory(&self) -> anyhow::Result<Option<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.choose_save_directory().await
    }
}

pub struct Fixture {
    pub terminal: Recorder,
    pub server: Recorder,
    pub chooser: CountingChooser,
    pub filter: TrzszFilter,
}

pub fn fixture(chooser: StaticChooser, config: FilterConfig) -> Fixture {
    let terminal = Recorder::default();
    let server = Recorder::default();
    let chooser = CountingChooser::new(chooser);
    let filter = TrzszFilter::new(
        terminal.sink(),
        server.sink(),
        LocalFileProvider::new(chooser.clone()),
        config,
    )
    .unwrap();
    Fixture {
        terminal,
        server,
        chooser,
        filter,
    }
}

pub fn decode(line: &str) -> ProtocolMessage {
    ProtocolMessage::parse(line.trim_end_matches('\n')).unwrap()
}

pub fn decode_action(line: &str) -> TransferAction {
    let msg = decode(line);
    assert_eq!(msg.tag, Tag::Act);
    serde_json::from_str(&msg.decode_text().unwrap()).unwrap()
}

pub fn text_line(tag: Tag, text: &str) -> String {
    ProtocolMessage::text(tag, text).unwrap().encode("\n")
}

pub fn binary_line(tag: Tag, data: &[u8]) -> String {
    ProtocolMessage::binary(tag, data).unwrap().encode("\n")
}
