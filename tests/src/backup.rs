use {
    crate::{TestServer, USERS},
    anyhow::Result,
    blindbackup::{download::restore, upload::backup},
    blindbackup_protocol::{EncryptionKey, RelativePath},
    fs_err as fs,
    std::{path::Path, time::Duration},
};

fn all_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
        if entry.file_type()?.is_dir() {
            names.extend(all_names(&entry.path())?);
        }
    }
    Ok(names)
}

#[tokio::test(flavor = "multi_thread")]
async fn backup_and_restore_plain() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let ctx = server.ctx("alice", "alicepass", None)?;
    let source = server.local_dir("source")?;
    fs::create_dir_all(source.as_path().join("docs"))?;
    fs::write(source.as_path().join("docs/a.txt"), "alpha")?;
    fs::write(source.as_path().join("b.txt"), "beta")?;

    let remote: RelativePath = "saved".parse()?;
    let report = backup(&ctx, &source, &remote, false).await?;
    assert_eq!(report.transferred, 2);
    assert_eq!(report.failed, 0);
    let stored = server.backup_root().join("aliceHome/saved");
    assert_eq!(fs::read_to_string(stored.join("docs/a.txt"))?, "alpha");

    // Existing files are skipped without the flag.
    fs::write(source.as_path().join("b.txt"), "beta, changed")?;
    let report = backup(&ctx, &source, &remote, false).await?;
    assert_eq!(report.transferred, 0);
    assert_eq!(report.skipped, 2);
    let report = backup(&ctx, &source, &remote, true).await?;
    assert_eq!(report.transferred, 2);
    assert_eq!(fs::read_to_string(stored.join("b.txt"))?, "beta, changed");

    let target = server.local_dir("target")?;
    let report = restore(&ctx, &remote, &target, false).await?;
    assert_eq!(report.transferred, 2);
    assert_eq!(fs::read_to_string(target.as_path().join("docs/a.txt"))?, "alpha");
    assert_eq!(fs::read_to_string(target.as_path().join("b.txt"))?, "beta, changed");
    let modified = |path: &Path| fs::metadata(path).and_then(|meta| meta.modified());
    let restored = modified(&target.as_path().join("docs/a.txt"))?;
    let original = modified(&source.as_path().join("docs/a.txt"))?;
    let drift = restored
        .duration_since(original)
        .unwrap_or_else(|err| err.duration());
    assert!(drift < Duration::from_secs(1));

    server.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn encrypted_roundtrip() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let key = EncryptionKey::generate()?;
    let ctx = server.ctx("alice", "alicepass", Some(key.clone()))?;
    let source = server.local_dir("source")?;
    fs::create_dir_all(source.as_path().join("plans"))?;
    let content = "the secret plans ".repeat(1000);
    fs::write(source.as_path().join("plans/secret-plans.txt"), &content)?;

    let remote: RelativePath = "vault".parse()?;
    let report = backup(&ctx, &source, &remote, false).await?;
    assert_eq!(report.transferred, 1);

    let names = all_names(&server.backup_root().join("aliceHome"))?;
    assert!(!names.is_empty());
    assert!(names.iter().all(|name| !name.contains("secret") && !name.contains("plans")));

    // Another client with the same key can read it back.
    let other = server.ctx("alice", "alicepass", Some(key))?;
    let target = server.local_dir("target")?;
    let report = restore(&other, &remote, &target, false).await?;
    assert_eq!(report.transferred, 1);
    assert_eq!(
        fs::read_to_string(target.as_path().join("plans/secret-plans.txt"))?,
        content
    );

    // A different key sees nothing it can decrypt.
    let stranger = server.ctx("alice", "alicepass", Some(EncryptionKey::generate()?))?;
    let target = server.local_dir("stranger")?;
    let report = restore(&stranger, &remote, &target, false).await;
    assert!(report.is_err() || all_names(target.as_path())?.is_empty());

    server.stop().await
}
