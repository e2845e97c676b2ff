//! libSQL implementation of `AccountStore`.
//!
//! Supports local file and in-memory databases. Uniqueness of names and
//! identities is enforced by the schema, so a `create` that loses a race
//! against another session fails with `DatabaseError::Constraint`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::channels::Identity;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Account, AccountStore, NewAccount, Permissions};

/// Column order used by every account SELECT; `row_to_account` relies on it.
const ACCOUNT_COLUMNS: &str = "id, username, normalized_name, external_id, credential_hash, \
     email, country, activated, permissions, created_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlAccountStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlAccountStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_account<P>(
        &self,
        filter: &str,
        params: P,
        context: &str,
    ) -> Result<Option<Account>, DatabaseError>
    where
        P: IntoParams + Send,
    {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {filter}"),
                params,
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let account = row_to_account(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(account))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{context}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to an Account. Column order matches `ACCOUNT_COLUMNS`.
fn row_to_account(row: &libsql::Row) -> Result<Account, libsql::Error> {
    let id: i64 = row.get(0)?;
    let username: String = row.get(1)?;
    let normalized_name: String = row.get(2)?;
    let external_id: String = row.get(3)?;
    let credential_hash: String = row.get(4)?;
    let email: String = row.get(5)?;
    let country: String = row.get(6)?;
    let activated: i64 = row.get(7)?;
    let permissions: i64 = row.get(8)?;
    let created_str: String = row.get(9)?;

    Ok(Account {
        id,
        username,
        normalized_name,
        external_identity: Identity::new(external_id),
        credential_hash,
        email,
        country,
        activated: activated != 0,
        permissions: Permissions::from_bits(
            u32::try_from(permissions).unwrap_or(Permissions::NORMAL.bits()),
        ),
        created_at: parse_datetime(&created_str),
    })
}

/// Classify an INSERT failure; uniqueness violations become `Constraint`.
fn map_insert_error(e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(message)
    } else {
        DatabaseError::Query(format!("create_account: {message}"))
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl AccountStore for LibSqlAccountStore {
    async fn find_by_identity(&self, identity: &Identity) -> Result<Option<Account>, DatabaseError> {
        self.query_account(
            "external_id = ?1",
            params![identity.as_str()],
            "find_by_identity",
        )
        .await
    }

    async fn find_by_normalized_name(&self, name: &str) -> Result<Option<Account>, DatabaseError> {
        self.query_account(
            "normalized_name = ?1",
            params![name],
            "find_by_normalized_name",
        )
        .await
    }

    async fn create(&self, account: NewAccount) -> Result<Account, DatabaseError> {
        let created_at = Utc::now();
        // RETURNING keeps the id tied to this statement; the connection is
        // shared between concurrent sessions.
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO accounts (username, normalized_name, external_id, credential_hash,
                    email, country, activated, permissions, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 RETURNING id",
                params![
                    account.username.clone(),
                    account.normalized_name.clone(),
                    account.external_identity.as_str(),
                    account.credential_hash.clone(),
                    account.email.clone(),
                    account.country.clone(),
                    i64::from(account.activated),
                    i64::from(account.permissions.bits()),
                    created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(map_insert_error)?;

        let id: i64 = match rows.next().await.map_err(map_insert_error)? {
            Some(row) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("create_account id: {e}")))?,
            None => {
                return Err(DatabaseError::Query(
                    "create_account: insert returned no id".to_string(),
                ));
            }
        };
        debug!(id, normalized_name = %account.normalized_name, "Account inserted into DB");

        Ok(Account {
            id,
            username: account.username,
            normalized_name: account.normalized_name,
            external_identity: account.external_identity,
            credential_hash: account.credential_hash,
            email: account.email,
            country: account.country,
            activated: account.activated,
            permissions: account.permissions,
            created_at,
        })
    }
}
