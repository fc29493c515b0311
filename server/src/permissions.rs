use blindbackup_protocol::{PermissionBit, Permissions};

/// Kind of operation a request performs, as far as access control is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    Delete,
    List,
    Stat,
    ServerTime,
    Notify,
    Admin,
    /// Inspecting one's own account. Any authenticated user may do it.
    WhoAmI,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied,
}

impl OperationKind {
    pub fn required_bit(self) -> Option<PermissionBit> {
        match self {
            Self::Read => Some(PermissionBit::Read),
            Self::Write => Some(PermissionBit::Write),
            Self::Delete => Some(PermissionBit::Delete),
            Self::List | Self::Stat => Some(PermissionBit::Sync),
            Self::ServerTime => Some(PermissionBit::Time),
            Self::Notify => Some(PermissionBit::Notify),
            Self::Admin => Some(PermissionBit::Admin),
            Self::WhoAmI => None,
        }
    }
}

pub fn authorize(permissions: Permissions, operation: OperationKind) -> Authorization {
    match operation.required_bit() {
        None => Authorization::Allowed,
        Some(bit) if permissions.contains(bit) => Authorization::Allowed,
        Some(_) => Authorization::Denied,
    }
}
