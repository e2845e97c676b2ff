//! The registration flow's view of persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::channels::Identity;
use crate::error::DatabaseError;

/// Permission bit set stored on an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permissions(u32);

impl Permissions {
    pub const NORMAL: Permissions = Permissions(1);
    pub const SUPPORTER: Permissions = Permissions(4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Permissions granted to a freshly registered account.
    pub const fn for_new_account(free_supporter: bool) -> Self {
        if free_supporter {
            Self(Self::NORMAL.0 | Self::SUPPORTER.0)
        } else {
            Self::NORMAL
        }
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A persisted account.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    /// Display form, as the user typed it.
    pub username: String,
    /// Lowercase, underscore form. Unique.
    pub normalized_name: String,
    /// Messaging identity that registered the account. Unique.
    pub external_identity: Identity,
    /// Self-describing password hash string.
    pub credential_hash: String,
    pub email: String,
    pub country: String,
    pub activated: bool,
    pub permissions: Permissions,
    pub created_at: DateTime<Utc>,
}

/// Fields of an account about to be created.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub normalized_name: String,
    pub external_identity: Identity,
    pub credential_hash: String,
    pub email: String,
    pub country: String,
    pub activated: bool,
    pub permissions: Permissions,
}

/// Backend-agnostic account persistence.
///
/// Implementations must enforce uniqueness of `external_identity` and
/// `normalized_name` themselves, including under concurrent `create` calls;
/// the lookups are advisory.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Find the account linked to a messaging identity.
    async fn find_by_identity(&self, identity: &Identity) -> Result<Option<Account>, DatabaseError>;

    /// Find the account owning a normalized name.
    async fn find_by_normalized_name(&self, name: &str) -> Result<Option<Account>, DatabaseError>;

    /// Create an account atomically.
    ///
    /// A uniqueness collision returns `DatabaseError::Constraint`.
    async fn create(&self, account: NewAccount) -> Result<Account, DatabaseError>;
}
