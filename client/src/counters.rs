use {
    blindbackup_sdk::diff::{Side, SyncOperation},
    std::fmt,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: u64,
    pub downloaded: u64,
    pub deleted: u64,
    pub created_dirs: u64,
    pub conflicts: u64,
    pub failed: u64,
}

impl SyncReport {
    pub(crate) fn record(&mut self, operation: &SyncOperation) {
        let counter = match operation {
            SyncOperation::Copy {
                to: Side::Server, ..
            } => &mut self.uploaded,
            SyncOperation::Copy {
                to: Side::Client, ..
            } => &mut self.downloaded,
            SyncOperation::Delete { .. } => &mut self.deleted,
            SyncOperation::Mkdir { .. } => &mut self.created_dirs,
        };
        *counter = counter.saturating_add(1);
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uploaded: {}, downloaded: {}, deleted: {}, created directories: {}",
            self.uploaded, self.downloaded, self.deleted, self.created_dirs
        )?;
        if self.conflicts > 0 {
            write!(f, ", conflicts: {}", self.conflicts)?;
        }
        if self.failed > 0 {
            write!(f, ", failed: {}", self.failed)?;
        }
        Ok(())
    }
}

/// Outcome of a one-way copy of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub transferred: u64,
    /// Files that already existed at the destination.
    pub skipped: u64,
    pub failed: u64,
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transferred: {}, skipped: {}", self.transferred, self.skipped)?;
        if self.failed > 0 {
            write!(f, ", failed: {}", self.failed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        blindbackup_protocol::{FileEntry, RelativePath},
        chrono::Utc,
    };

    #[test]
    fn report() {
        let path: RelativePath = "a".parse().unwrap();
        let mut report = SyncReport::default();
        report.record(&SyncOperation::Copy {
            path: path.clone(),
            to: Side::Server,
            source: FileEntry::file(path.clone(), 1, Utc::now()),
        });
        report.record(&SyncOperation::Delete {
            path: path.clone(),
            side: Side::Client,
            is_dir: false,
        });
        report.record(&SyncOperation::Mkdir {
            path,
            side: Side::Server,
        });
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.created_dirs, 1);
        assert_eq!(
            report.to_string(),
            "uploaded: 1, downloaded: 0, deleted: 1, created directories: 1"
        );
        report.failed = 2;
        assert!(report.to_string().ends_with("failed: 2"));
    }

    #[test]
    fn transfer_report() {
        let report = TransferReport {
            transferred: 3,
            skipped: 1,
            failed: 0,
        };
        assert_eq!(report.to_string(), "transferred: 3, skipped: 1");
    }
}
