//! Upload sessions driven through the public filter API.

mod common;

use common::*;
use tempfile::TempDir;
use trzsz_filter::transfer::Tag;
use trzsz_filter::{FilterConfig, SessionOutcome, StaticChooser};

#[tokio::test]
async fn test_trz_upload_single_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.txt");
    std::fs::write(&path, TEST_CONTENT).unwrap();

    let Fixture {
        terminal,
        server,
        chooser,
        mut filter,
    } = fixture(
        StaticChooser::new().with_send_paths([&path]),
        FilterConfig::default(),
    );

    filter.process_server_output("::TRZSZ:TRANSFER:R:1.0.0:0");
    assert_eq!(terminal.lines(), ["::TRZSZ:TRANSFER:R:1.0.0:0"]);
    assert!(filter.is_transferring());

    server.wait_for_len(1).await;
    filter.process_server_output(UPLOAD_CFG);
    filter.process_server_output("#SUCC:1\n");
    filter.process_server_output(text_line(Tag::Succ, "test.txt.0"));
    filter.process_terminal_input("user input");
    filter.process_binary_input(b"binary input");
    filter.set_terminal_columns(100);
    filter.process_server_output("#SUCC:13\n");
    filter.process_server_output("#SUCC:13\n");
    filter.process_server_output("#SUCC:eJy79tqIQ6ZJ72rRdtb0pty5cwE+YAdb\n");

    assert_eq!(
        filter.join_session().await,
        Some(SessionOutcome::Completed {
            names: vec!["test.txt.0".to_string()]
        })
    );
    assert!(!filter.is_transferring());
    assert_eq!(chooser.calls(), 1);

    let sent = server.lines();
    assert_eq!(sent.len(), 7);
    assert!(decode_action(&sent[0]).confirm);
    assert_eq!(sent[1], "#NUM:1\n");
    assert_eq!(decode(&sent[2]).tag, Tag::Name);
    assert_eq!(decode(&sent[2]).decode_text().unwrap(), "test.txt");
    assert_eq!(sent[3], "#SIZE:13\n");
    assert_eq!(decode(&sent[4]).tag, Tag::Data);
    assert_eq!(decode(&sent[4]).decode_binary().unwrap(), TEST_CONTENT);
    assert_eq!(decode(&sent[5]).tag, Tag::Md5);
    assert_eq!(
        decode(&sent[5]).decode_binary().unwrap(),
        md5::compute(TEST_CONTENT).0
    );
    assert_eq!(decode(&sent[6]).tag, Tag::Exit);
    assert_eq!(
        decode(&sent[6]).decode_text().unwrap(),
        "Saved 1 file/directory\r\n- test.txt.0"
    );

    filter.process_server_output("Received test.txt.0 to /tmp\n");

    let shown = terminal.lines();
    assert_eq!(shown.len(), 4);
    assert!(shown[1].contains("test.txt ["));
    assert!(shown[2].contains("test.txt ["));
    assert!(shown[2].contains("100%"));
    assert_eq!(shown[3], "Received test.txt.0 to /tmp\n");
}

#[tokio::test]
async fn test_trigger_after_prompt_text() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.txt");
    std::fs::write(&path, TEST_CONTENT).unwrap();

    let Fixture {
        terminal,
        server,
        mut filter,
        ..
    } = fixture(
        StaticChooser::new().with_send_paths([&path]),
        FilterConfig::default(),
    );

    let chunk = "$ trz\r\n::TRZSZ:TRANSFER:R:1.1.5:1697512345678\r\n";
    filter.process_server_output(chunk);
    assert_eq!(terminal.lines(), [chunk]);

    server.wait_for_len(1).await;
    filter.process_server_output("#fail:eJwLLskvKEhNAQALbQLg\n");
    assert!(matches!(
        filter.join_session().await,
        Some(SessionOutcome::Failed { reason }) if reason.contains("Stopped")
    ));
    assert_eq!(server.len(), 1);
}

#[tokio::test]
async fn test_trz_upload_two_files_with_progress_prefix() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&a, b"aaaa").unwrap();
    std::fs::write(&b, b"bb").unwrap();

    let Fixture {
        terminal,
        server,
        mut filter,
        ..
    } = fixture(
        StaticChooser::new().with_send_paths([&a, &b]),
        FilterConfig::default(),
    );

    filter.process_server_output("::TRZSZ:TRANSFER:R:1.1.5:0\n");
    server.wait_for_len(1).await;
    filter.process_server_output(UPLOAD_CFG);
    filter.process_server_output("#SUCC:2\n");
    for (name, data) in [("a.txt", &b"aaaa"[..]), ("b.txt", &b"bb"[..])] {
        filter.process_server_output(text_line(Tag::Succ, name));
        filter.process_server_output(format!("#SUCC:{}\n", data.len()));
        filter.process_server_output(format!("#SUCC:{}\n", data.len()));
        filter.process_server_output(binary_line(Tag::Succ, &md5::compute(data).0));
    }

    assert_eq!(
        filter.join_session().await,
        Some(SessionOutcome::Completed {
            names: vec!["a.txt".to_string(), "b.txt".to_string()]
        })
    );

    let sent = server.lines();
    assert_eq!(sent.len(), 1 + 1 + 2 * 4 + 1);
    assert_eq!(
        decode(sent.last().unwrap()).decode_text().unwrap(),
        "Saved 2 files/directories\r\n- a.txt\r\n- b.txt"
    );

    let shown = terminal.lines();
    assert_eq!(shown.len(), 1 + 2 * 2);
    assert!(shown[1].starts_with("(1/2) a.txt ["));
    assert!(shown[3].starts_with("\r\n(2/2) b.txt ["));
}

#[tokio::test]
async fn test_trz_upload_directory() {
    let dir = TempDir::new().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir(&docs).unwrap();
    std::fs::write(docs.join("a.txt"), b"a").unwrap();

    let Fixture {
        server, mut filter, ..
    } = fixture(
        StaticChooser::new().with_send_paths([&docs]),
        FilterConfig::default(),
    );

    filter.process_server_output("::TRZSZ:TRANSFER:D:1.1.5:0\n");
    server.wait_for_len(1).await;
    filter.process_server_output(text_line(Tag::Cfg, r#"{"lang":"py","directory":true}"#));
    filter.process_server_output("#SUCC:2\n");
    filter.process_server_output(text_line(Tag::Succ, "docs"));
    filter.process_server_output(text_line(Tag::Succ, "docs"));
    filter.process_server_output("#SUCC:1\n");
    filter.process_server_output("#SUCC:1\n");
    filter.process_server_output(binary_line(Tag::Succ, &md5::compute(b"a").0));

    assert_eq!(
        filter.join_session().await,
        Some(SessionOutcome::Completed {
            names: vec!["docs".to_string()]
        })
    );

    let sent = server.lines();
    let tags: Vec<Tag> = sent.iter().map(|l| decode(l).tag).collect();
    assert_eq!(
        tags,
        [
            Tag::Act,
            Tag::Num,
            Tag::Name,
            Tag::Name,
            Tag::Size,
            Tag::Data,
            Tag::Md5,
            Tag::Exit
        ]
    );
    assert_eq!(
        decode(&sent[2]).decode_text().unwrap(),
        r#"{"path_id":0,"path_name":["docs"],"is_dir":true}"#
    );
    assert_eq!(
        decode(&sent[3]).decode_text().unwrap(),
        r#"{"path_id":0,"path_name":["docs","a.txt"],"is_dir":false}"#
    );
}

#[tokio::test]
async fn test_trz_unreadable_choice_fails_session() {
    let dir = TempDir::new().unwrap();
    let Fixture {
        server, mut filter, ..
    } = fixture(
        StaticChooser::new().with_send_paths([dir.path().join("missing.txt")]),
        FilterConfig::default(),
    );

    filter.process_server_output("::TRZSZ:TRANSFER:R:1.1.5:0\n");
    let outcome = filter.join_session().await;
    assert!(matches!(
        outcome,
        Some(SessionOutcome::Failed { reason }) if reason.contains("does not exist")
    ));

    let sent = server.lines();
    assert_eq!(sent.len(), 1);
    assert_eq!(decode(&sent[0]).tag, Tag::Fail);
}
