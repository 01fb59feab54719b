//! Group instance repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist the group instances discovered when a data file is ingested.
//! - Keep ordinal bookkeeping inside the repository boundary.
//!
//! # Invariants
//! - Listing is deterministic: `ordinal ASC`.
//! - Ordinals of one kind are contiguous from 1; removal compacts later ones.
//! - Re-ingestion replaces every instance of a kind atomically.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::section::{GroupInstance, GroupInstanceId, GroupKind};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Result type used by group repository operations.
pub type GroupRepoResult<T> = Result<T, GroupRepoError>;

/// Errors from group repository operations.
#[derive(Debug)]
pub enum GroupRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target instance does not exist.
    InstanceNotFound(GroupInstanceId),
    /// Display name is blank after trim.
    InvalidDisplayName,
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for GroupRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InstanceNotFound(id) => write!(f, "group instance not found: {id}"),
            Self::InvalidDisplayName => write!(f, "group display name must not be blank"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "group repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid group data: {message}"),
        }
    }
}

impl Error for GroupRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for GroupRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for GroupRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for group instance persistence.
pub trait GroupRepository {
    /// Replaces all instances of `kind` with `display_names`, in order.
    fn replace_instances(
        &self,
        kind: GroupKind,
        display_names: &[String],
    ) -> GroupRepoResult<Vec<GroupInstance>>;
    /// Lists instances of `kind` by ordinal.
    fn list_instances(&self, kind: GroupKind) -> GroupRepoResult<Vec<GroupInstance>>;
    /// Removes one instance and compacts later ordinals. Returns the removed
    /// instance as it was before removal.
    fn remove_instance(&self, id: GroupInstanceId) -> GroupRepoResult<GroupInstance>;
}

/// SQLite-backed group repository.
pub struct SqliteGroupRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteGroupRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> GroupRepoResult<Self> {
        let expected_version = latest_version();
        let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if actual_version != expected_version {
            return Err(GroupRepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }
}

impl GroupRepository for SqliteGroupRepository<'_> {
    fn replace_instances(
        &self,
        kind: GroupKind,
        display_names: &[String],
    ) -> GroupRepoResult<Vec<GroupInstance>> {
        let mut instances = Vec::with_capacity(display_names.len());
        for (index, name) in display_names.iter().enumerate() {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(GroupRepoError::InvalidDisplayName);
            }
            instances.push(GroupInstance::new(kind, index as u32 + 1, trimmed));
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM group_instances WHERE kind = ?1;",
            [kind.as_db()],
        )?;
        for instance in &instances {
            tx.execute(
                "INSERT INTO group_instances (instance_uuid, kind, ordinal, display_name)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    instance.id.to_string(),
                    kind.as_db(),
                    instance.ordinal,
                    instance.display_name.as_str(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(instances)
    }

    fn list_instances(&self, kind: GroupKind) -> GroupRepoResult<Vec<GroupInstance>> {
        let mut stmt = self.conn.prepare(
            "SELECT instance_uuid, kind, ordinal, display_name
             FROM group_instances
             WHERE kind = ?1
             ORDER BY ordinal ASC;",
        )?;
        let mut rows = stmt.query([kind.as_db()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_group_row(row)?);
        }
        Ok(items)
    }

    fn remove_instance(&self, id: GroupInstanceId) -> GroupRepoResult<GroupInstance> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let removed = {
            let mut stmt = tx.prepare(
                "SELECT instance_uuid, kind, ordinal, display_name
                 FROM group_instances
                 WHERE instance_uuid = ?1;",
            )?;
            let mut rows = stmt.query([id.to_string()])?;
            let found = match rows.next()? {
                Some(row) => Some(parse_group_row(row)?),
                None => None,
            };
            found
        };
        let removed = removed.ok_or(GroupRepoError::InstanceNotFound(id))?;

        tx.execute(
            "DELETE FROM group_instances WHERE instance_uuid = ?1;",
            [id.to_string()],
        )?;

        let later = list_later_ids(&tx, removed.kind, removed.ordinal)?;
        for (offset, later_id) in later.into_iter().enumerate() {
            tx.execute(
                "UPDATE group_instances SET ordinal = ?2 WHERE instance_uuid = ?1;",
                params![later_id, removed.ordinal + offset as u32],
            )?;
        }

        tx.commit()?;
        Ok(removed)
    }
}

fn list_later_ids(conn: &Connection, kind: GroupKind, ordinal: u32) -> GroupRepoResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT instance_uuid
         FROM group_instances
         WHERE kind = ?1 AND ordinal > ?2
         ORDER BY ordinal ASC;",
    )?;
    let mut rows = stmt.query(params![kind.as_db(), ordinal])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(row.get(0)?);
    }
    Ok(ids)
}

fn parse_group_row(row: &Row<'_>) -> GroupRepoResult<GroupInstance> {
    let id_text: String = row.get("instance_uuid")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        GroupRepoError::InvalidData(format!(
            "invalid uuid `{id_text}` in group_instances.instance_uuid"
        ))
    })?;
    let kind_text: String = row.get("kind")?;
    let kind = GroupKind::from_db(&kind_text).ok_or_else(|| {
        GroupRepoError::InvalidData(format!(
            "invalid group kind `{kind_text}` in group_instances.kind"
        ))
    })?;

    Ok(GroupInstance {
        id,
        kind,
        ordinal: row.get("ordinal")?,
        display_name: row.get("display_name")?,
    })
}

