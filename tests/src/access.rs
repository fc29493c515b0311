use {
    crate::{TestServer, USERS},
    anyhow::Result,
    blindbackup_protocol::{
        ChangeKind, ErrorCode, FileEntry,
        endpoints::{
            DownloadFile, GetServerTime, ListDirectory, ListenChanges, PollChanges, RemovePath,
            Stat, UploadFile, WhoAmI,
        },
    },
    blindbackup_sdk::client::error_code,
    futures::TryStreamExt,
    std::{io::Cursor, pin::pin},
};

fn upload_request(path: &str) -> UploadFile {
    UploadFile {
        path: path.into(),
        modified_at: None,
        overwrite: false,
        origin: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_list_remove() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let alice = server.client("alice", "alicepass")?;
    alice
        .upload(&upload_request("notes.txt"), Cursor::new(b"0123456789".to_vec()))
        .await?;
    assert!(server.backup_root().join("aliceHome/notes.txt").is_file());

    let reader = server.client("reader", "readerpass")?;
    let entries: Vec<FileEntry> = pin!(reader.stream(&ListDirectory {
        path: String::new(),
        recursive: false,
    }))
    .try_collect()
    .await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path.as_str(), "notes.txt");
    assert_eq!(entries[0].size, 10);
    assert!(!entries[0].is_dir);

    let mut content = Vec::new();
    let size = reader
        .download(&DownloadFile { path: "notes.txt".into() }, &mut content)
        .await?;
    assert_eq!(size, 10);
    assert_eq!(content, b"0123456789");

    // Readers can't delete.
    let err = reader
        .request(&RemovePath {
            path: "notes.txt".into(),
            origin: None,
        })
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));

    alice
        .request(&RemovePath {
            path: "notes.txt".into(),
            origin: None,
        })
        .await?;
    let err = reader
        .download(&DownloadFile { path: "notes.txt".into() }, &mut Vec::new())
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::NotFound));

    server.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn overwrite_requires_flag() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let alice = server.client("alice", "alicepass")?;
    alice
        .upload(&upload_request("a.txt"), Cursor::new(b"first".to_vec()))
        .await?;
    let err = alice
        .upload(&upload_request("a.txt"), Cursor::new(b"second".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::Conflict));

    let request = UploadFile {
        overwrite: true,
        ..upload_request("a.txt")
    };
    alice.upload(&request, Cursor::new(b"second".to_vec())).await?;
    let entry = alice.request(&Stat { path: "a.txt".into() }).await?;
    assert_eq!(entry.size, 6);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn confinement_and_authentication() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let alice = server.client("alice", "alicepass")?;
    alice
        .upload(&upload_request("secret.txt"), Cursor::new(b"secret".to_vec()))
        .await?;

    let bob = server.client("bob", "bobpass")?;
    let err = bob
        .download(
            &DownloadFile {
                path: "../aliceHome/secret.txt".into(),
            },
            &mut Vec::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PathEscape));
    let err = bob
        .request(&Stat {
            path: "a/../../aliceHome".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PathEscape));

    // Bob lacks the time bit, alice has it.
    let err = bob.request(&GetServerTime).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));
    alice.request(&GetServerTime).await?;

    let wrong = server.client("alice", "bobpass")?;
    let err = wrong.request(&WhoAmI).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::AuthenticationFailed));
    let unknown = server.client("mallory", "alicepass")?;
    let err = unknown.request(&WhoAmI).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::AuthenticationFailed));

    let me = bob.request(&WhoAmI).await?;
    assert_eq!(me.name, "bob");
    assert_eq!(me.home.as_str(), "bobHome");

    server.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn change_notifications() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let watcher = server.client("alice", "alicepass")?;
    let id = watcher
        .request(&ListenChanges {
            path: "docs".into(),
        })
        .await?;

    let writer = server.client("alice", "alicepass")?;
    writer
        .upload(&upload_request("docs/report.txt"), Cursor::new(b"report".to_vec()))
        .await?;
    writer
        .upload(&upload_request("other.txt"), Cursor::new(b"other".to_vec()))
        .await?;

    let events = watcher.request(&PollChanges { id: id.clone() }).await?;
    assert_eq!(events.len(), 1);
    assert!(events[0].path.as_str().ends_with("docs/report.txt"));
    assert_eq!(events[0].kind, ChangeKind::File);
    assert_eq!(events[0].origin, None);

    // Nothing new: the poll times out with an empty batch.
    let events = watcher.request(&PollChanges { id }).await?;
    assert!(events.is_empty());

    server.stop().await
}
