use {
    crate::{
        credentials::{CredentialStore, CredentialTable, User, check_home, check_login},
        error::{DispatchError, DispatchResult},
    },
    blindbackup_protocol::{Password, UserInfo, endpoints::SaveUser},
    tracing::info,
};

const MIN_PASSWORD_LEN: usize = 6;

pub fn users(table: &CredentialTable) -> Vec<UserInfo> {
    table.users().map(User::info).collect()
}

fn check_password_policy(login: &str, password: &Password) -> DispatchResult<()> {
    if password.as_unmasked_str().chars().count() < MIN_PASSWORD_LEN {
        return Err(DispatchError::Conflict("password is too short"));
    }
    if password.as_unmasked_str() == login {
        return Err(DispatchError::Conflict("password must differ from the login"));
    }
    Ok(())
}

/// Creates or updates a user on behalf of `admin`.
///
/// Without a new password an existing user keeps the current one and a new
/// user is created disabled.
pub fn save_user(store: &CredentialStore, admin: &str, request: SaveUser) -> DispatchResult<()> {
    let SaveUser {
        login,
        home,
        permissions,
        password,
    } = request;
    if check_login(&login).is_err() {
        return Err(DispatchError::Conflict("invalid user name"));
    }
    if check_home(&home).is_err() {
        return Err(DispatchError::Conflict("invalid home directory"));
    }
    if login == admin {
        return Err(DispatchError::PermissionDenied);
    }
    if let Some(password) = &password {
        check_password_policy(&login, password)?;
    }
    store.edit(|table| {
        let stored_password = match (&password, table.get(&login)) {
            (Some(password), _) => password.hashed(),
            (None, Some(existing)) => existing.stored_password().to_owned(),
            (None, None) => String::new(),
        };
        table.upsert(User::new(login.clone(), home.clone(), permissions, stored_password));
        Ok(())
    })?;
    info!(admin, %login, %home, %permissions, "user saved");
    Ok(())
}

pub fn delete_user(store: &CredentialStore, admin: &str, login: &str) -> DispatchResult<()> {
    if login == admin {
        return Err(DispatchError::PermissionDenied);
    }
    store
        .edit(|table| Ok(table.remove(login).is_some()))?
        .then_some(())
        .ok_or(DispatchError::NotFound)?;
    info!(admin, login, "user deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        blindbackup_protocol::{Credentials, ErrorCode},
        tempfile::TempDir,
    };

    fn setup() -> (TempDir, CredentialStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passwd.txt");
        fs_err::write(&path, "root::A:rootpass\nbob:bobhome:R:bobpass\n").unwrap();
        let store = CredentialStore::load(&path).unwrap();
        (dir, store)
    }

    fn request(login: &str, password: Option<&str>) -> SaveUser {
        SaveUser {
            login: login.into(),
            home: "carolhome".parse().unwrap(),
            permissions: "RS".parse().unwrap(),
            password: password.map(Password::new),
        }
    }

    fn can_login(store: &CredentialStore, login: &str, password: &str) -> bool {
        store
            .current()
            .authenticate(&Credentials::new(login, Password::new(password)))
            .is_some()
    }

    #[test]
    fn create_update_delete() {
        let (_dir, store) = setup();
        save_user(&store, "root", request("carol", Some("carolpass"))).unwrap();
        assert!(can_login(&store, "carol", "carolpass"));
        let carol = users(&store.current())
            .into_iter()
            .find(|user| user.name == "carol")
            .unwrap();
        assert_eq!(carol.home.as_str(), "carolhome");
        assert_eq!(carol.permissions.to_string(), "RS");

        // Keeps the password.
        let mut update = request("carol", None);
        update.permissions = "W".parse().unwrap();
        save_user(&store, "root", update).unwrap();
        assert!(can_login(&store, "carol", "carolpass"));
        assert_eq!(store.current().get("carol").unwrap().permissions.to_string(), "W");

        delete_user(&store, "root", "carol").unwrap();
        assert!(!can_login(&store, "carol", "carolpass"));
        let err = delete_user(&store, "root", "carol").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn new_user_without_password_is_disabled() {
        let (_dir, store) = setup();
        save_user(&store, "root", request("dave", None)).unwrap();
        assert!(store.current().get("dave").is_some());
        assert!(!can_login(&store, "dave", ""));
    }

    #[test]
    fn policy() {
        let (_dir, store) = setup();
        for (login, password) in [("carol", "short"), ("carol1", "carol1"), ("Carol", "carolpass")] {
            let err = save_user(&store, "root", request(login, Some(password))).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Conflict, "{login}");
        }
        let err = save_user(&store, "root", request("root", Some("newrootpass"))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        let err = delete_user(&store, "root", "root").unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(store.current().len(), 2);
        assert!(can_login(&store, "bob", "bobpass"));
    }

    #[test]
    fn home_must_fit_the_file_format() {
        let (dir, store) = setup();
        for home in ["a:b", "x\ny", "x:R:pw\nmallory::RWDSTNA:pw12345\nzed:z", "tab\there"] {
            let mut request = request("carol", Some("carolpass"));
            request.home = home.parse().unwrap();
            let err = save_user(&store, "root", request).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Conflict, "{home:?}");
        }
        assert!(store.current().get("carol").is_none());
        assert!(store.current().get("mallory").is_none());

        save_user(&store, "root", request("carol", Some("carolpass"))).unwrap();
        let text = fs_err::read_to_string(dir.path().join("passwd.txt")).unwrap();
        let reparsed = CredentialTable::parse(&text).unwrap();
        assert_eq!(
            reparsed.users().collect::<Vec<_>>(),
            store.current().users().collect::<Vec<_>>()
        );
        // Further edits still work.
        delete_user(&store, "root", "carol").unwrap();
    }
}
