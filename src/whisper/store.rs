//! Persistent SQLite store for pending whispers, whispers, watchers and the
//! group/user registries.
//!
//! Every operation that must not race another handler is a single statement
//! or a single transaction, so the connection mutex is the only lock needed.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A whisper waiting for its text in the initiator's private chat.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWhisper {
    pub token: String,
    pub initiator_id: i64,
    pub target_id: i64,
    pub target_name: String,
    pub conversation_id: i64,
    pub conversation_title: String,
    pub placeholder_message_id: Option<i64>,
    pub expires_at: DateTime<Utc>,
}

/// How the content reached the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryChannel {
    /// Sent as a private message after the button press.
    Button,
    /// Shown in the callback alert.
    Alert,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Button => "button",
            DeliveryChannel::Alert => "alert",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "button" => Some(DeliveryChannel::Button),
            "alert" => Some(DeliveryChannel::Alert),
            _ => None,
        }
    }
}

/// A collected whisper.
#[derive(Debug, Clone, PartialEq)]
pub struct Whisper {
    pub token: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub target_id: i64,
    pub target_name: String,
    pub conversation_id: i64,
    pub conversation_title: String,
    pub content: String,
    pub delivered: bool,
    pub delivered_via: Option<DeliveryChannel>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Disclosure message in the group, once posted.
    pub message_id: Option<i64>,
}

/// Helper message left behind by an expired pending whisper.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredPlaceholder {
    pub conversation_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub chat_id: i64,
    pub title: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Watch {
    pub conversation_id: i64,
    pub watcher_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub users: usize,
    pub groups: usize,
    pub active_groups: usize,
    pub whispers: usize,
    pub read_whispers: usize,
    pub pending: usize,
}

fn ts(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

fn from_ts(secs: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {secs}")))
}

const PENDING_COLUMNS: &str = "token, initiator_id, target_id, target_name, conversation_id, conversation_title, placeholder_message_id, expires_at";

const WHISPER_COLUMNS: &str = "token, sender_id, sender_name, target_id, target_name, conversation_id, conversation_title, content, delivered, delivered_via, read_at, created_at, message_id";

/// Raw pending row; timestamps are converted outside the rusqlite closure.
fn pending_row(row: &Row<'_>) -> rusqlite::Result<(PendingWhisper, i64)> {
    let expires: i64 = row.get(7)?;
    Ok((
        PendingWhisper {
            token: row.get(0)?,
            initiator_id: row.get(1)?,
            target_id: row.get(2)?,
            target_name: row.get(3)?,
            conversation_id: row.get(4)?,
            conversation_title: row.get(5)?,
            placeholder_message_id: row.get(6)?,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
        },
        expires,
    ))
}

fn finish_pending((mut pending, expires): (PendingWhisper, i64)) -> StoreResult<PendingWhisper> {
    pending.expires_at = from_ts(expires)?;
    Ok(pending)
}

struct WhisperRow {
    whisper: Whisper,
    delivered_via: Option<String>,
    read_at: Option<i64>,
    created_at: i64,
}

fn whisper_row(row: &Row<'_>) -> rusqlite::Result<WhisperRow> {
    Ok(WhisperRow {
        whisper: Whisper {
            token: row.get(0)?,
            sender_id: row.get(1)?,
            sender_name: row.get(2)?,
            target_id: row.get(3)?,
            target_name: row.get(4)?,
            conversation_id: row.get(5)?,
            conversation_title: row.get(6)?,
            content: row.get(7)?,
            delivered: row.get(8)?,
            delivered_via: None,
            read_at: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            message_id: row.get(12)?,
        },
        delivered_via: row.get(9)?,
        read_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn finish_whisper(raw: WhisperRow) -> StoreResult<Whisper> {
    let mut whisper = raw.whisper;
    whisper.delivered_via = match raw.delivered_via {
        Some(via) => Some(
            DeliveryChannel::from_str(&via)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown delivery channel: {via}")))?,
        ),
        None => None,
    };
    whisper.read_at = raw.read_at.map(from_ts).transpose()?;
    whisper.created_at = from_ts(raw.created_at)?;
    Ok(whisper)
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Create a new in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;

        let stats = store.stats()?;
        info!(
            "Loaded database from {:?} ({} whispers, {} pending, {} groups, {} users)",
            path, stats.whispers, stats.pending, stats.groups, stats.users
        );
        Ok(store)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS pending (
                initiator_id INTEGER PRIMARY KEY,
                token TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                target_name TEXT NOT NULL,
                conversation_id INTEGER NOT NULL,
                conversation_title TEXT NOT NULL,
                placeholder_message_id INTEGER,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS whispers (
                token TEXT PRIMARY KEY,
                sender_id INTEGER NOT NULL,
                sender_name TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                target_name TEXT NOT NULL,
                conversation_id INTEGER NOT NULL,
                conversation_title TEXT NOT NULL,
                content TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                delivered_via TEXT,
                read_at INTEGER,
                created_at INTEGER NOT NULL,
                message_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS groups (
                chat_id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                first_seen INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watchers (
                conversation_id INTEGER NOT NULL,
                watcher_id INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, watcher_id)
            );

            CREATE INDEX IF NOT EXISTS idx_pending_expires ON pending(expires_at);
            CREATE INDEX IF NOT EXISTS idx_whispers_conversation ON whispers(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_whispers_created ON whispers(created_at);
        "#)?;
        Ok(())
    }

    // ==================== PENDING ====================

    /// Insert or replace the initiator's pending whisper (last write wins).
    pub fn upsert_pending(&self, pending: &PendingWhisper) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pending (initiator_id, token, target_id, target_name, conversation_id, conversation_title, placeholder_message_id, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(initiator_id) DO UPDATE SET
                token = excluded.token,
                target_id = excluded.target_id,
                target_name = excluded.target_name,
                conversation_id = excluded.conversation_id,
                conversation_title = excluded.conversation_title,
                placeholder_message_id = excluded.placeholder_message_id,
                expires_at = excluded.expires_at",
            params![
                pending.initiator_id,
                pending.token,
                pending.target_id,
                pending.target_name,
                pending.conversation_id,
                pending.conversation_title,
                pending.placeholder_message_id,
                ts(pending.expires_at),
            ],
        )?;
        Ok(())
    }

    /// Put back a pending whisper taken by a failed collection, unless the
    /// initiator has started a new one in the meantime.
    pub fn restore_pending(&self, pending: &PendingWhisper) -> StoreResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO pending (initiator_id, token, target_id, target_name, conversation_id, conversation_title, placeholder_message_id, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(initiator_id) DO NOTHING",
            params![
                pending.initiator_id,
                pending.token,
                pending.target_id,
                pending.target_name,
                pending.conversation_id,
                pending.conversation_title,
                pending.placeholder_message_id,
                ts(pending.expires_at),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Record the helper message id. Only applies if the token is still current.
    pub fn attach_placeholder(&self, initiator_id: i64, token: &str, message_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE pending SET placeholder_message_id = ?3 WHERE initiator_id = ?1 AND token = ?2",
            params![initiator_id, token, message_id],
        )?;
        Ok(updated > 0)
    }

    /// The initiator's pending whisper, if present and not expired at `now`.
    pub fn pending_for(&self, initiator_id: i64, now: DateTime<Utc>) -> StoreResult<Option<PendingWhisper>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {PENDING_COLUMNS} FROM pending WHERE initiator_id = ?1 AND expires_at > ?2"),
                params![initiator_id, ts(now)],
                pending_row,
            )
            .optional()?;
        raw.map(finish_pending).transpose()
    }

    /// Atomically delete and return the pending whisper with this token.
    /// Of two concurrent callers only one gets `Some`.
    pub fn take_pending(&self, initiator_id: i64, token: &str) -> StoreResult<Option<PendingWhisper>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("DELETE FROM pending WHERE initiator_id = ?1 AND token = ?2 RETURNING {PENDING_COLUMNS}"),
                params![initiator_id, token],
                pending_row,
            )
            .optional()?;
        raw.map(finish_pending).transpose()
    }

    /// Delete the initiator's pending whisper regardless of state.
    pub fn cancel_pending(&self, initiator_id: i64) -> StoreResult<Option<PendingWhisper>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("DELETE FROM pending WHERE initiator_id = ?1 RETURNING {PENDING_COLUMNS}"),
                params![initiator_id],
                pending_row,
            )
            .optional()?;
        raw.map(finish_pending).transpose()
    }

    /// Delete every pending whisper whose expiry has passed and return the
    /// helper messages they left behind.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<ExpiredPlaceholder>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "DELETE FROM pending WHERE expires_at <= ?1 RETURNING conversation_id, placeholder_message_id",
        )?;
        let rows = stmt.query_map(params![ts(now)], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?))
        })?;

        let mut expired = Vec::new();
        for row in rows {
            let (conversation_id, message_id) = row?;
            if let Some(message_id) = message_id {
                expired.push(ExpiredPlaceholder { conversation_id, message_id });
            }
        }
        if !expired.is_empty() {
            debug!("Swept {} expired pending whisper(s)", expired.len());
        }
        Ok(expired)
    }

    // ==================== WHISPERS ====================

    pub fn insert_whisper(&self, whisper: &Whisper) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO whispers ({WHISPER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
            params![
                whisper.token,
                whisper.sender_id,
                whisper.sender_name,
                whisper.target_id,
                whisper.target_name,
                whisper.conversation_id,
                whisper.conversation_title,
                whisper.content,
                whisper.delivered,
                whisper.delivered_via.map(|v| v.as_str()),
                whisper.read_at.map(ts),
                ts(whisper.created_at),
                whisper.message_id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_whisper(&self, token: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM whispers WHERE token = ?1", params![token])? > 0)
    }

    pub fn whisper(&self, token: &str) -> StoreResult<Option<Whisper>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {WHISPER_COLUMNS} FROM whispers WHERE token = ?1"),
                params![token],
                whisper_row,
            )
            .optional()?;
        raw.map(finish_whisper).transpose()
    }

    pub fn attach_whisper_message(&self, token: &str, message_id: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE whispers SET message_id = ?2 WHERE token = ?1",
            params![token, message_id],
        )?;
        Ok(())
    }

    pub fn mark_delivered(&self, token: &str, via: DeliveryChannel) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE whispers SET delivered = 1, delivered_via = ?2 WHERE token = ?1",
            params![token, via.as_str()],
        )?;
        Ok(())
    }

    /// Set `read_at` unless already set. Returns true for the first read only.
    pub fn mark_read(&self, token: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE whispers SET read_at = ?2 WHERE token = ?1 AND read_at IS NULL",
            params![token, ts(now)],
        )?;
        Ok(updated > 0)
    }

    /// Delete whispers created before `cutoff`. Returns the number removed.
    pub fn purge_whispers_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM whispers WHERE created_at < ?1", params![ts(cutoff)])?;
        if removed > 0 {
            info!("🧹 Purged {} old whisper(s)", removed);
        }
        Ok(removed)
    }

    // ==================== GROUPS & USERS ====================

    pub fn upsert_group(&self, chat_id: i64, title: &str, active: bool, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO groups (chat_id, title, active, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET
                title = excluded.title,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![chat_id, title, active, ts(now)],
        )?;
        Ok(())
    }

    pub fn set_group_active(&self, chat_id: i64, active: bool, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE groups SET active = ?2, updated_at = ?3 WHERE chat_id = ?1",
            params![chat_id, active, ts(now)],
        )?;
        Ok(())
    }

    pub fn group(&self, chat_id: i64) -> StoreResult<Option<Group>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT chat_id, title, active FROM groups WHERE chat_id = ?1",
                params![chat_id],
                |row| Ok(Group { chat_id: row.get(0)?, title: row.get(1)?, active: row.get(2)? }),
            )
            .optional()?)
    }

    pub fn active_group_ids(&self) -> StoreResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT chat_id FROM groups WHERE active = 1 ORDER BY chat_id")?;
        let ids = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Remember a user who talked to the bot privately.
    pub fn touch_user(&self, user_id: i64, name: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (user_id, name, first_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET name = excluded.name",
            params![user_id, name, ts(now)],
        )?;
        Ok(())
    }

    pub fn user_ids(&self) -> StoreResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY user_id")?;
        let ids = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    // ==================== WATCHERS ====================

    /// Returns false if the pair was already present.
    pub fn add_watcher(&self, conversation_id: i64, watcher_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO watchers (conversation_id, watcher_id) VALUES (?1, ?2)",
            params![conversation_id, watcher_id],
        )?;
        Ok(inserted > 0)
    }

    /// Returns false if the pair was not present.
    pub fn remove_watcher(&self, conversation_id: i64, watcher_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM watchers WHERE conversation_id = ?1 AND watcher_id = ?2",
            params![conversation_id, watcher_id],
        )?;
        Ok(removed > 0)
    }

    pub fn watchers_of(&self, conversation_id: i64) -> StoreResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT watcher_id FROM watchers WHERE conversation_id = ?1 ORDER BY watcher_id",
        )?;
        let ids = stmt
            .query_map(params![conversation_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn all_watches(&self) -> StoreResult<Vec<Watch>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id, watcher_id FROM watchers ORDER BY conversation_id, watcher_id",
        )?;
        let watches = stmt
            .query_map([], |row| Ok(Watch { conversation_id: row.get(0)?, watcher_id: row.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(watches)
    }

    pub fn stats(&self) -> StoreResult<Stats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> StoreResult<usize> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as usize)
        };
        Ok(Stats {
            users: count("SELECT COUNT(*) FROM users")?,
            groups: count("SELECT COUNT(*) FROM groups")?,
            active_groups: count("SELECT COUNT(*) FROM groups WHERE active = 1")?,
            whispers: count("SELECT COUNT(*) FROM whispers")?,
            read_whispers: count("SELECT COUNT(*) FROM whispers WHERE read_at IS NOT NULL")?,
            pending: count("SELECT COUNT(*) FROM pending")?,
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> StoreResult<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn make_pending(initiator_id: i64, token: &str, expires_at: DateTime<Utc>) -> PendingWhisper {
        PendingWhisper {
            token: token.to_string(),
            initiator_id,
            target_id: 200,
            target_name: "Bob".to_string(),
            conversation_id: -100,
            conversation_title: "Friends".to_string(),
            placeholder_message_id: None,
            expires_at,
        }
    }

    fn make_whisper(token: &str, content: &str, created_at: DateTime<Utc>) -> Whisper {
        Whisper {
            token: token.to_string(),
            sender_id: 100,
            sender_name: "Alice".to_string(),
            target_id: 200,
            target_name: "Bob".to_string(),
            conversation_id: -100,
            conversation_title: "Friends".to_string(),
            content: content.to_string(),
            delivered: false,
            delivered_via: None,
            read_at: None,
            created_at,
            message_id: None,
        }
    }

    #[test]
    fn test_upsert_replaces_previous_pending() {
        let store = Store::in_memory().unwrap();
        store.upsert_pending(&make_pending(100, "first", at(900))).unwrap();

        let mut second = make_pending(100, "second", at(900));
        second.target_id = 300;
        store.upsert_pending(&second).unwrap();

        let current = store.pending_for(100, at(0)).unwrap().unwrap();
        assert_eq!(current.token, "second");
        assert_eq!(current.target_id, 300);
        assert_eq!(store.stats().unwrap().pending, 1);
        assert!(store.take_pending(100, "first").unwrap().is_none());
    }

    #[test]
    fn test_pending_for_hides_expired() {
        let store = Store::in_memory().unwrap();
        store.upsert_pending(&make_pending(100, "tok", at(900))).unwrap();

        assert!(store.pending_for(100, at(899)).unwrap().is_some());
        assert!(store.pending_for(100, at(900)).unwrap().is_none());
    }

    #[test]
    fn test_attach_placeholder_checks_token() {
        let store = Store::in_memory().unwrap();
        store.upsert_pending(&make_pending(100, "tok", at(900))).unwrap();

        assert!(!store.attach_placeholder(100, "stale", 55).unwrap());
        assert!(store.attach_placeholder(100, "tok", 55).unwrap());
        let pending = store.pending_for(100, at(0)).unwrap().unwrap();
        assert_eq!(pending.placeholder_message_id, Some(55));
    }

    #[test]
    fn test_take_pending_only_once() {
        let store = Store::in_memory().unwrap();
        let pending = make_pending(100, "tok", at(900));
        store.upsert_pending(&pending).unwrap();

        assert_eq!(store.take_pending(100, "tok").unwrap(), Some(pending));
        assert_eq!(store.take_pending(100, "tok").unwrap(), None);
    }

    #[test]
    fn test_restore_pending_does_not_clobber_newer() {
        let store = Store::in_memory().unwrap();
        let old = make_pending(100, "old", at(900));
        assert!(store.restore_pending(&old).unwrap());
        store.take_pending(100, "old").unwrap();

        store.upsert_pending(&make_pending(100, "new", at(900))).unwrap();
        assert!(!store.restore_pending(&old).unwrap());
        assert_eq!(store.pending_for(100, at(0)).unwrap().unwrap().token, "new");
    }

    #[test]
    fn test_cancel_pending() {
        let store = Store::in_memory().unwrap();
        store.upsert_pending(&make_pending(100, "tok", at(900))).unwrap();

        assert!(store.cancel_pending(100).unwrap().is_some());
        assert!(store.cancel_pending(100).unwrap().is_none());
    }

    #[test]
    fn test_sweep_returns_placeholders() {
        let store = Store::in_memory().unwrap();
        let mut with_helper = make_pending(100, "a", at(10));
        with_helper.placeholder_message_id = Some(77);
        store.upsert_pending(&with_helper).unwrap();
        store.upsert_pending(&make_pending(101, "b", at(10))).unwrap();
        store.upsert_pending(&make_pending(102, "c", at(1000))).unwrap();

        let expired = store.sweep_expired(at(20)).unwrap();
        assert_eq!(expired, vec![ExpiredPlaceholder { conversation_id: -100, message_id: 77 }]);
        assert_eq!(store.stats().unwrap().pending, 1);

        // Idempotent
        assert!(store.sweep_expired(at(20)).unwrap().is_empty());
        assert!(store.pending_for(102, at(20)).unwrap().is_some());
    }

    #[test]
    fn test_whisper_round_trip() {
        let store = Store::in_memory().unwrap();
        let whisper = make_whisper("tok", "سلام <b>friend</b>", at(0));
        store.insert_whisper(&whisper).unwrap();

        assert_eq!(store.whisper("tok").unwrap(), Some(whisper));
        assert_eq!(store.whisper("missing").unwrap(), None);
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let store = Store::in_memory().unwrap();
        store.insert_whisper(&make_whisper("tok", "a", at(0))).unwrap();
        assert!(store.insert_whisper(&make_whisper("tok", "b", at(0))).is_err());
        assert_eq!(store.whisper("tok").unwrap().unwrap().content, "a");
    }

    #[test]
    fn test_mark_read_only_first_time() {
        let store = Store::in_memory().unwrap();
        store.insert_whisper(&make_whisper("tok", "hi", at(0))).unwrap();

        assert!(store.mark_read("tok", at(5)).unwrap());
        assert!(!store.mark_read("tok", at(50)).unwrap());
        assert_eq!(store.whisper("tok").unwrap().unwrap().read_at, Some(at(5)));
    }

    #[test]
    fn test_mark_delivered() {
        let store = Store::in_memory().unwrap();
        store.insert_whisper(&make_whisper("tok", "hi", at(0))).unwrap();
        store.mark_delivered("tok", DeliveryChannel::Alert).unwrap();

        let whisper = store.whisper("tok").unwrap().unwrap();
        assert!(whisper.delivered);
        assert_eq!(whisper.delivered_via, Some(DeliveryChannel::Alert));
    }

    #[test]
    fn test_purge_old_whispers() {
        let store = Store::in_memory().unwrap();
        store.insert_whisper(&make_whisper("old", "a", at(0))).unwrap();
        store.insert_whisper(&make_whisper("new", "b", at(0) + Duration::days(40))).unwrap();

        let removed = store.purge_whispers_before(at(0) + Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.whisper("old").unwrap().is_none());
        assert!(store.whisper("new").unwrap().is_some());
    }

    #[test]
    fn test_group_registry() {
        let store = Store::in_memory().unwrap();
        store.upsert_group(-1, "One", true, at(0)).unwrap();
        store.upsert_group(-2, "Two", true, at(0)).unwrap();
        store.set_group_active(-2, false, at(1)).unwrap();
        store.upsert_group(-1, "One renamed", true, at(2)).unwrap();

        assert_eq!(store.active_group_ids().unwrap(), vec![-1]);
        assert_eq!(store.group(-1).unwrap().unwrap().title, "One renamed");
        assert!(!store.group(-2).unwrap().unwrap().active);
    }

    #[test]
    fn test_watchers_are_unique_pairs() {
        let store = Store::in_memory().unwrap();
        assert!(store.add_watcher(-100, 5).unwrap());
        assert!(!store.add_watcher(-100, 5).unwrap());
        assert!(store.add_watcher(-100, 6).unwrap());
        assert!(store.add_watcher(-200, 5).unwrap());

        assert_eq!(store.watchers_of(-100).unwrap(), vec![5, 6]);
        assert!(store.remove_watcher(-100, 5).unwrap());
        assert!(!store.remove_watcher(-100, 5).unwrap());
        assert_eq!(store.watchers_of(-100).unwrap(), vec![6]);
        assert_eq!(store.all_watches().unwrap().len(), 2);
    }

    #[test]
    fn test_users_and_stats() {
        let store = Store::in_memory().unwrap();
        store.touch_user(1, "Alice", at(0)).unwrap();
        store.touch_user(1, "Alice B", at(1)).unwrap();
        store.touch_user(2, "Bob", at(1)).unwrap();
        store.insert_whisper(&make_whisper("tok", "x", at(0))).unwrap();
        store.mark_read("tok", at(1)).unwrap();

        assert_eq!(store.user_ids().unwrap(), vec![1, 2]);
        let stats = store.stats().unwrap();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.whispers, 1);
        assert_eq!(stats.read_whispers, 1);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("najva.db");
        {
            let store = Store::open(&path).unwrap();
            store.insert_whisper(&make_whisper("tok", "kept", at(0))).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.whisper("tok").unwrap().unwrap().content, "kept");
    }
}
