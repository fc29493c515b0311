use {
    crate::{TestServer, USERS},
    anyhow::Result,
    blindbackup::{
        path::SanitizedLocalPath,
        sync::{SyncRequest, sync},
        upload::backup,
    },
    blindbackup_protocol::{EncryptionKey, RelativePath, endpoints::UploadFile},
    blindbackup_sdk::{SyncDirection, SyncOptions},
    fs_err as fs,
    std::io::Cursor,
};

#[tokio::test(flavor = "multi_thread")]
async fn symmetric_sync_copies_both_ways() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let ctx = server.ctx("alice", "alicepass", None)?;
    let local = server.local_dir("sym")?;
    fs::write(local.as_path().join("a.txt"), "a")?;
    let a_path = SanitizedLocalPath::new(local.as_path().join("a.txt"))?;
    backup(&ctx, &a_path, &"sym/a.txt".parse::<RelativePath>()?, false).await?;
    server
        .client("alice", "alicepass")?
        .upload(
            &UploadFile {
                path: "sym/c.txt".into(),
                modified_at: None,
                overwrite: false,
                origin: None,
            },
            Cursor::new(b"c".to_vec()),
        )
        .await?;
    fs::write(local.as_path().join("b.txt"), "b")?;

    let remote: RelativePath = "sym".parse()?;
    let request = SyncRequest {
        local: &local,
        remote: &remote,
        direction: SyncDirection::Bidirectional,
        options: SyncOptions::default(),
        dry_run: false,
    };
    let report = sync(&ctx, &request).await?;
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.conflicts, 0);
    let stored = server.backup_root().join("aliceHome/sym");
    assert_eq!(fs::read_to_string(stored.join("b.txt"))?, "b");
    assert_eq!(fs::read_to_string(local.as_path().join("c.txt"))?, "c");
    assert!(local.as_path().join("a.txt").exists());

    let report = sync(&ctx, &request).await?;
    assert_eq!((report.uploaded, report.downloaded, report.deleted), (0, 0, 0));

    server.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn two_clients_converge() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let remote: RelativePath = "shared".parse()?;
    let first_ctx = server.ctx("alice", "alicepass", None)?;
    let second_ctx = server.ctx("alice", "alicepass", None)?;
    let first = server.local_dir("first")?;
    let second = server.local_dir("second")?;
    fs::create_dir_all(first.as_path().join("a/b"))?;
    fs::write(first.as_path().join("a/b/c.txt"), "c")?;
    fs::write(first.as_path().join("a/top.txt"), "top")?;

    let request = |local| SyncRequest {
        local,
        remote: &remote,
        direction: SyncDirection::Bidirectional,
        options: SyncOptions::default(),
        dry_run: false,
    };

    let dry_run = SyncRequest {
        dry_run: true,
        ..request(&first)
    };
    let report = sync(&first_ctx, &dry_run).await?;
    assert_eq!(report.uploaded, 0);
    assert!(!server.backup_root().join("aliceHome/shared").exists());

    let report = sync(&first_ctx, &request(&first)).await?;
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(
        fs::read_to_string(server.backup_root().join("aliceHome/shared/a/b/c.txt"))?,
        "c"
    );

    let report = sync(&second_ctx, &request(&second)).await?;
    assert_eq!(report.downloaded, 2);
    assert_eq!(fs::read_to_string(second.as_path().join("a/b/c.txt"))?, "c");
    assert_eq!(fs::read_to_string(second.as_path().join("a/top.txt"))?, "top");

    // Nothing left to do on either side.
    let report = sync(&first_ctx, &request(&first)).await?;
    assert_eq!((report.uploaded, report.downloaded, report.deleted), (0, 0, 0));

    // A local delete travels through the server to the other client.
    fs::remove_file(first.as_path().join("a/top.txt"))?;
    let report = sync(&first_ctx, &request(&first)).await?;
    assert_eq!(report.deleted, 1);
    assert!(!server.backup_root().join("aliceHome/shared/a/top.txt").exists());
    let report = sync(&second_ctx, &request(&second)).await?;
    assert_eq!(report.deleted, 1);
    assert!(!second.as_path().join("a/top.txt").exists());
    assert!(second.as_path().join("a/b/c.txt").exists());

    server.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn one_way_modes() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let remote: RelativePath = "mirror".parse()?;
    let ctx = server.ctx("bob", "bobpass", None)?;
    let local = server.local_dir("mirror")?;
    fs::write(local.as_path().join("keep.txt"), "keep")?;
    fs::write(local.as_path().join("drop.txt"), "drop")?;

    let to_server = SyncRequest {
        local: &local,
        remote: &remote,
        direction: SyncDirection::ToServer,
        options: SyncOptions::default(),
        dry_run: false,
    };
    let report = sync(&ctx, &to_server).await?;
    assert_eq!(report.uploaded, 2);

    fs::remove_file(local.as_path().join("drop.txt"))?;
    let keep_deletes = SyncRequest {
        options: SyncOptions {
            mirror_deletes: false,
            ..SyncOptions::default()
        },
        ..to_server
    };
    let report = sync(&ctx, &keep_deletes).await?;
    assert_eq!(report.deleted, 0);
    let stored = server.backup_root().join("bobHome/mirror");
    assert!(stored.join("drop.txt").exists());

    let report = sync(&ctx, &to_server).await?;
    assert_eq!(report.deleted, 1);
    assert!(!stored.join("drop.txt").exists());

    // The server is authoritative in the other direction.
    fs::write(local.as_path().join("extra.txt"), "extra")?;
    let from_server = SyncRequest {
        direction: SyncDirection::FromServer,
        ..to_server
    };
    let report = sync(&ctx, &from_server).await?;
    assert_eq!(report.deleted, 1);
    assert!(!local.as_path().join("extra.txt").exists());
    assert!(local.as_path().join("keep.txt").exists());

    server.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn baseline_is_not_reused_with_another_key() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let remote: RelativePath = "vault".parse()?;
    let local = server.local_dir("vault")?;
    fs::write(local.as_path().join("a.txt"), "a")?;
    fs::write(local.as_path().join("b.txt"), "b")?;
    let request = SyncRequest {
        local: &local,
        remote: &remote,
        direction: SyncDirection::Bidirectional,
        options: SyncOptions::default(),
        dry_run: false,
    };

    let ctx = server.ctx_with_state("alice", "alicepass", Some(EncryptionKey::generate()?), "shared")?;
    let report = sync(&ctx, &request).await?;
    assert_eq!(report.uploaded, 2);
    drop(ctx);

    // Same state database and directories, different key: the server's
    // entries are unreadable, which must not look like remote deletions.
    let ctx = server.ctx_with_state("alice", "alicepass", Some(EncryptionKey::generate()?), "shared")?;
    let report = sync(&ctx, &request).await?;
    assert_eq!(report.deleted, 0);
    assert_eq!(fs::read_to_string(local.as_path().join("a.txt"))?, "a");
    assert_eq!(fs::read_to_string(local.as_path().join("b.txt"))?, "b");
    drop(ctx);

    // Same for a plain-text view of the same tree.
    let ctx = server.ctx_with_state("alice", "alicepass", None, "shared")?;
    let report = sync(&ctx, &request).await?;
    assert_eq!(report.deleted, 0);
    assert!(local.as_path().join("a.txt").exists());
    assert!(local.as_path().join("b.txt").exists());

    server.stop().await
}
