use {
    crate::path::SanitizedLocalPath,
    anyhow::Result,
    blindbackup_protocol::{FileEntry, Listing, RelativePath, encoding},
    std::path::Path,
};

/// Local state of the client.
pub struct Db {
    #[expect(dead_code, reason = "keeps the database open")]
    db: sled::Db,
    baselines: sled::Tree,
    /// See `Config::remote_identity`.
    identity: String,
}

impl Db {
    /// Identifies a pair of synchronized directories as seen through this identity.
    fn baseline_key(&self, local: &SanitizedLocalPath, remote: &RelativePath) -> Vec<u8> {
        let mut key = self.identity.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(local.as_str().as_bytes());
        key.push(0);
        key.extend_from_slice(remote.as_str().as_bytes());
        key
    }

    pub fn open(path: &Path, identity: String) -> Result<Db> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let db = sled::open(path)?;
        Ok(Self {
            baselines: db.open_tree("baselines")?,
            db,
            identity,
        })
    }

    /// Listing both sides agreed on after the last sync of this pair, if any.
    pub fn baseline(
        &self,
        local: &SanitizedLocalPath,
        remote: &RelativePath,
    ) -> Result<Option<Listing>> {
        let Some(value) = self.baselines.get(self.baseline_key(local, remote))? else {
            return Ok(None);
        };
        let entries: Vec<FileEntry> = encoding::deserialize(&value)?;
        Ok(Some(entries.into_iter().collect()))
    }

    pub fn set_baseline(
        &self,
        local: &SanitizedLocalPath,
        remote: &RelativePath,
        listing: &Listing,
    ) -> Result<()> {
        let entries: Vec<&FileEntry> = listing.iter().collect();
        self.baselines
            .insert(self.baseline_key(local, remote), encoding::serialize(&entries)?)?;
        self.baselines.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, chrono::Utc, tempfile::TempDir};

    #[test]
    fn baselines_are_per_pair() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(&dir.path().join("state/db"), "first".into()).unwrap();
        let local = SanitizedLocalPath::new(dir.path()).unwrap();
        let docs: RelativePath = "docs".parse().unwrap();
        let photos: RelativePath = "photos".parse().unwrap();
        assert!(db.baseline(&local, &docs).unwrap().is_none());

        let listing: Listing = [
            FileEntry::dir("a".parse().unwrap(), Utc::now()),
            FileEntry::file("a/b.txt".parse().unwrap(), 5, Utc::now()),
        ]
        .into_iter()
        .collect();
        db.set_baseline(&local, &docs, &listing).unwrap();
        assert_eq!(db.baseline(&local, &docs).unwrap(), Some(listing));
        assert!(db.baseline(&local, &photos).unwrap().is_none());

        db.set_baseline(&local, &docs, &Listing::new()).unwrap();
        assert_eq!(db.baseline(&local, &docs).unwrap(), Some(Listing::new()));
    }

    #[test]
    fn baselines_are_per_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/db");
        let local = SanitizedLocalPath::new(dir.path()).unwrap();
        let docs: RelativePath = "docs".parse().unwrap();
        let listing: Listing = [FileEntry::file("a.txt".parse().unwrap(), 1, Utc::now())]
            .into_iter()
            .collect();
        {
            let db = Db::open(&path, "first".into()).unwrap();
            db.set_baseline(&local, &docs, &listing).unwrap();
        }
        let db = Db::open(&path, "second".into()).unwrap();
        assert!(db.baseline(&local, &docs).unwrap().is_none());
    }
}
