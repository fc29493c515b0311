use {
    crate::{TestServer, USERS},
    anyhow::Result,
    blindbackup_protocol::{
        ErrorCode, Password,
        endpoints::{DeleteUser, GetUsers, SaveUser, WhoAmI},
    },
    blindbackup_sdk::{Client, client::error_code},
    std::time::Duration,
    tokio::time::{Instant, sleep},
};

fn save(login: &str, password: Option<&str>) -> Result<SaveUser> {
    Ok(SaveUser {
        login: login.into(),
        home: "daveHome".parse()?,
        permissions: "RS".parse()?,
        password: password.map(Password::new),
    })
}

async fn auth_error(client: &Client) -> Option<ErrorCode> {
    client.request(&WhoAmI).await.err().as_ref().and_then(error_code)
}

#[tokio::test(flavor = "multi_thread")]
async fn manage_users() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let admin = server.client("admin", "adminpass")?;
    let alice = server.client("alice", "alicepass")?;

    let err = alice.request(&GetUsers).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));

    let users = admin.request(&GetUsers).await?;
    let names: Vec<&str> = users.iter().map(|user| user.name.as_str()).collect();
    assert_eq!(names, ["admin", "alice", "bob", "reader"]);

    // Created without a password: exists, but can't log in.
    admin.request(&save("dave", None)?).await?;
    let dave = server.client("dave", "davepassword")?;
    assert_eq!(auth_error(&dave).await, Some(ErrorCode::AuthenticationFailed));

    admin.request(&save("dave", Some("davepassword"))?).await?;
    let me = dave.request(&WhoAmI).await?;
    assert_eq!(me.home.as_str(), "daveHome");
    assert_eq!(me.permissions.to_string(), "RS");
    let users_file = server.read_users()?;
    assert!(users_file.contains("dave:daveHome:RS:sha256:"));
    assert!(!users_file.contains("davepassword"));

    let err = admin.request(&save("dave", Some("dave"))?).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::Conflict));
    let err = admin.request(&save("admin", Some("newadminpass"))?).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));
    let err = admin
        .request(&DeleteUser {
            login: "admin".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));

    admin
        .request(&DeleteUser {
            login: "dave".into(),
        })
        .await?;
    assert_eq!(auth_error(&dave).await, Some(ErrorCode::AuthenticationFailed));
    let err = admin
        .request(&DeleteUser {
            login: "dave".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::NotFound));

    server.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn homes_cannot_break_the_password_file() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let admin = server.client("admin", "adminpass")?;
    for home in ["a:b", "x\ny", "x:R:pw\nmallory::RWDSTNA:pw12345\nzed:z"] {
        let request = SaveUser {
            home: home.parse()?,
            ..save("erin", Some("erinpassword"))?
        };
        let err = admin.request(&request).await.unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::Conflict), "{home:?}");
    }
    assert_eq!(server.read_users()?, USERS);

    admin.request(&save("erin", Some("erinpassword"))?).await?;
    // The rewritten file is still accepted by a fresh server.
    let users_file = server.read_users()?;
    server.stop().await?;
    let restarted = TestServer::start(&users_file).await?;
    let erin = restarted.client("erin", "erinpassword")?;
    assert_eq!(erin.request(&WhoAmI).await?.home.as_str(), "daveHome");
    let mallory = restarted.client("mallory", "pw12345")?;
    assert_eq!(auth_error(&mallory).await, Some(ErrorCode::AuthenticationFailed));

    restarted.stop().await
}

#[tokio::test(flavor = "multi_thread")]
async fn password_file_is_reloaded() -> Result<()> {
    let server = TestServer::start(USERS).await?;
    let carol = server.client("carol", "carolpass")?;
    assert_eq!(auth_error(&carol).await, Some(ErrorCode::AuthenticationFailed));

    server.write_users(&format!("{USERS}carol:carolHome:R:carolpass\n"))?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while auth_error(&carol).await.is_some() {
        assert!(Instant::now() < deadline, "new user was not picked up");
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(carol.request(&WhoAmI).await?.home.as_str(), "carolHome");

    // A broken file keeps the previous users.
    server.write_users("this is not a password file")?;
    sleep(Duration::from_millis(500)).await;
    carol.request(&WhoAmI).await?;

    server.write_users(USERS)?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while auth_error(&carol).await.is_none() {
        assert!(Instant::now() < deadline, "removed user can still log in");
        sleep(Duration::from_millis(100)).await;
    }

    server.stop().await
}
