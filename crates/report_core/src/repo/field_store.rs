//! Field store contracts with in-memory and SQLite implementations.
//!
//! # Responsibility
//! - Provide keyed scalar (`section_id`, `field_name`) and table-valued
//!   (`section_id`, `table_name`) storage.
//! - Notify subscribers after every successful mutation.
//! - Support suffix-wide key migration used when group instances are removed.
//!
//! # Invariants
//! - Reads never mutate and never notify.
//! - Listeners are called synchronously, after the write is visible.
//! - Values are stored verbatim; acceptance rules belong to the resolver.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::field::TableRow;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from field store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted value cannot be decoded.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "field store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid stored value: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::UninitializedConnection { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// What changed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Field {
        section_id: String,
        field_name: String,
    },
    Table {
        section_id: String,
        table_name: String,
    },
    /// Bulk rename/removal of every key ending in `suffix`.
    Suffix { suffix: String },
}

pub type SubscriptionId = u64;
pub type ChangeListener = Box<dyn FnMut(&StoreChange)>;

/// Listener registry shared by store implementations.
#[derive(Default)]
pub struct ChangeNotifier {
    next_id: SubscriptionId,
    listeners: Vec<(SubscriptionId, ChangeListener)>,
}

impl ChangeNotifier {
    pub fn subscribe(&mut self, listener: ChangeListener) -> SubscriptionId {
        self.next_id += 1;
        self.listeners.push((self.next_id, listener));
        self.next_id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(current, _)| *current != id);
        self.listeners.len() != before
    }

    pub fn notify(&mut self, change: &StoreChange) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(change);
        }
    }
}

/// Store contract consumed by the resolution engine and photo coordinator.
pub trait FieldStore {
    /// Loads one raw scalar value.
    fn get_field(&self, section_id: &str, field_name: &str) -> StoreResult<Option<Value>>;
    /// Writes one scalar value and notifies listeners.
    fn set_field(&mut self, section_id: &str, field_name: &str, value: Value) -> StoreResult<()>;
    /// Loads one raw table value.
    fn get_table(&self, section_id: &str, table_name: &str) -> StoreResult<Option<Vec<TableRow>>>;
    /// Writes one table value and notifies listeners.
    fn set_table(
        &mut self,
        section_id: &str,
        table_name: &str,
        rows: Vec<TableRow>,
    ) -> StoreResult<()>;
    /// Registers a change listener.
    fn subscribe(&mut self, listener: ChangeListener) -> SubscriptionId;
    /// Removes a change listener; returns whether it was registered.
    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;
    /// Renames every field/table key ending in `from` to end in `to`,
    /// overwriting existing targets. Returns the number of renamed keys.
    fn rename_suffix(&mut self, from: &str, to: &str) -> StoreResult<usize>;
    /// Deletes every field/table key ending in `suffix`.
    fn remove_suffix(&mut self, suffix: &str) -> StoreResult<usize>;
}

fn swap_suffix(key: &str, from: &str, to: &str) -> Option<String> {
    key.strip_suffix(from).map(|base| format!("{base}{to}"))
}

/// Process-local store used by tests and hosts that persist elsewhere.
#[derive(Default)]
pub struct MemoryFieldStore {
    fields: BTreeMap<(String, String), Value>,
    tables: BTreeMap<(String, String), Vec<TableRow>>,
    notifier: ChangeNotifier,
}

impl MemoryFieldStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn rename_keys<V>(
    map: &mut BTreeMap<(String, String), V>,
    from: &str,
    to: &str,
) -> usize {
    let matching: Vec<(String, String)> = map
        .keys()
        .filter(|(_, name)| name.ends_with(from))
        .cloned()
        .collect();
    let mut renamed = 0;
    for (section_id, name) in matching {
        let Some(target) = swap_suffix(&name, from, to) else {
            continue;
        };
        if let Some(value) = map.remove(&(section_id.clone(), name)) {
            map.insert((section_id, target), value);
            renamed += 1;
        }
    }
    renamed
}

fn remove_keys<V>(map: &mut BTreeMap<(String, String), V>, suffix: &str) -> usize {
    let before = map.len();
    map.retain(|(_, name), _| !name.ends_with(suffix));
    before - map.len()
}

impl FieldStore for MemoryFieldStore {
    fn get_field(&self, section_id: &str, field_name: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .fields
            .get(&(section_id.to_string(), field_name.to_string()))
            .cloned())
    }

    fn set_field(&mut self, section_id: &str, field_name: &str, value: Value) -> StoreResult<()> {
        self.fields
            .insert((section_id.to_string(), field_name.to_string()), value);
        self.notifier.notify(&StoreChange::Field {
            section_id: section_id.to_string(),
            field_name: field_name.to_string(),
        });
        Ok(())
    }

    fn get_table(&self, section_id: &str, table_name: &str) -> StoreResult<Option<Vec<TableRow>>> {
        Ok(self
            .tables
            .get(&(section_id.to_string(), table_name.to_string()))
            .cloned())
    }

    fn set_table(
        &mut self,
        section_id: &str,
        table_name: &str,
        rows: Vec<TableRow>,
    ) -> StoreResult<()> {
        self.tables
            .insert((section_id.to_string(), table_name.to_string()), rows);
        self.notifier.notify(&StoreChange::Table {
            section_id: section_id.to_string(),
            table_name: table_name.to_string(),
        });
        Ok(())
    }

    fn subscribe(&mut self, listener: ChangeListener) -> SubscriptionId {
        self.notifier.subscribe(listener)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    fn rename_suffix(&mut self, from: &str, to: &str) -> StoreResult<usize> {
        let renamed = rename_keys(&mut self.fields, from, to) + rename_keys(&mut self.tables, from, to);
        if renamed > 0 {
            self.notifier.notify(&StoreChange::Suffix {
                suffix: from.to_string(),
            });
        }
        Ok(renamed)
    }

    fn remove_suffix(&mut self, suffix: &str) -> StoreResult<usize> {
        let removed = remove_keys(&mut self.fields, suffix) + remove_keys(&mut self.tables, suffix);
        if removed > 0 {
            self.notifier.notify(&StoreChange::Suffix {
                suffix: suffix.to_string(),
            });
        }
        Ok(removed)
    }
}

/// SQLite-backed field store. Values are persisted as JSON text.
pub struct SqliteFieldStore<'conn> {
    conn: &'conn Connection,
    notifier: ChangeNotifier,
}

impl<'conn> SqliteFieldStore<'conn> {
    /// Creates store from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        let expected_version = latest_version();
        let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if actual_version != expected_version {
            return Err(StoreError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self {
            conn,
            notifier: ChangeNotifier::default(),
        })
    }
}

fn keys_with_suffix(
    conn: &Connection,
    table: KeyTable,
    suffix: &str,
) -> StoreResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(table.select_keys_sql())?;
    let mut rows = stmt.query([])?;
    let mut keys = Vec::new();
    while let Some(row) = rows.next()? {
        let section_id: String = row.get(0)?;
        let name: String = row.get(1)?;
        if name.ends_with(suffix) {
            keys.push((section_id, name));
        }
    }
    Ok(keys)
}

#[derive(Debug, Clone, Copy)]
enum KeyTable {
    Fields,
    Tables,
}

impl KeyTable {
    fn select_keys_sql(self) -> &'static str {
        match self {
            Self::Fields => "SELECT section_id, field_name FROM field_values;",
            Self::Tables => "SELECT section_id, table_name FROM table_values;",
        }
    }

    fn delete_sql(self) -> &'static str {
        match self {
            Self::Fields => "DELETE FROM field_values WHERE section_id = ?1 AND field_name = ?2;",
            Self::Tables => "DELETE FROM table_values WHERE section_id = ?1 AND table_name = ?2;",
        }
    }

    fn rename_sql(self) -> &'static str {
        match self {
            Self::Fields => {
                "UPDATE field_values
                 SET field_name = ?3,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE section_id = ?1 AND field_name = ?2;"
            }
            Self::Tables => {
                "UPDATE table_values
                 SET table_name = ?3,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE section_id = ?1 AND table_name = ?2;"
            }
        }
    }
}

impl FieldStore for SqliteFieldStore<'_> {
    fn get_field(&self, section_id: &str, field_name: &str) -> StoreResult<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json
                 FROM field_values
                 WHERE section_id = ?1 AND field_name = ?2;",
                params![section_id, field_name],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|err| {
                StoreError::InvalidData(format!(
                    "field `{field_name}` in section `{section_id}`: {err}"
                ))
            })
        })
        .transpose()
    }

    fn set_field(&mut self, section_id: &str, field_name: &str, value: Value) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO field_values (section_id, field_name, value_json)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(section_id, field_name) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![section_id, field_name, value.to_string()],
        )?;
        self.notifier.notify(&StoreChange::Field {
            section_id: section_id.to_string(),
            field_name: field_name.to_string(),
        });
        Ok(())
    }

    fn get_table(&self, section_id: &str, table_name: &str) -> StoreResult<Option<Vec<TableRow>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT rows_json
                 FROM table_values
                 WHERE section_id = ?1 AND table_name = ?2;",
                params![section_id, table_name],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|err| {
                StoreError::InvalidData(format!(
                    "table `{table_name}` in section `{section_id}`: {err}"
                ))
            })
        })
        .transpose()
    }

    fn set_table(
        &mut self,
        section_id: &str,
        table_name: &str,
        rows: Vec<TableRow>,
    ) -> StoreResult<()> {
        let encoded = serde_json::to_string(&rows)
            .map_err(|err| StoreError::InvalidData(format!("table `{table_name}`: {err}")))?;
        self.conn.execute(
            "INSERT INTO table_values (section_id, table_name, rows_json)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(section_id, table_name) DO UPDATE SET
                rows_json = excluded.rows_json,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![section_id, table_name, encoded],
        )?;
        self.notifier.notify(&StoreChange::Table {
            section_id: section_id.to_string(),
            table_name: table_name.to_string(),
        });
        Ok(())
    }

    fn subscribe(&mut self, listener: ChangeListener) -> SubscriptionId {
        self.notifier.subscribe(listener)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    fn rename_suffix(&mut self, from: &str, to: &str) -> StoreResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut renamed = 0;
        for table in [KeyTable::Fields, KeyTable::Tables] {
            for (section_id, name) in keys_with_suffix(&tx, table, from)? {
                let Some(target) = swap_suffix(&name, from, to) else {
                    continue;
                };
                tx.execute(table.delete_sql(), params![section_id, target])?;
                renamed += tx.execute(table.rename_sql(), params![section_id, name, target])?;
            }
        }
        tx.commit()?;

        if renamed > 0 {
            self.notifier.notify(&StoreChange::Suffix {
                suffix: from.to_string(),
            });
        }
        Ok(renamed)
    }

    fn remove_suffix(&mut self, suffix: &str) -> StoreResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut removed = 0;
        for table in [KeyTable::Fields, KeyTable::Tables] {
            for (section_id, name) in keys_with_suffix(&tx, table, suffix)? {
                removed += tx.execute(table.delete_sql(), params![section_id, name])?;
            }
        }
        tx.commit()?;

        if removed > 0 {
            self.notifier.notify(&StoreChange::Suffix {
                suffix: suffix.to_string(),
            });
        }
        Ok(removed)
    }
}
