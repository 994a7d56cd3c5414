use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::info;

use super::error::HubError;
use super::results::{ResultOrigin, SessionResult};
use super::session::{Session, SessionStatus};

/// Durable keyed registry of session records. All access goes through the
/// connection mutex, so a `update_with` read-mutate-write is atomic and a
/// concurrent poller update cannot clobber a user-issued delete.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HubError> {
        let db = Connection::open(path.as_ref())?;
        Self::init_schema(&db)?;
        info!("session store opened at {}", path.as_ref().display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn open_in_memory() -> Result<Self, HubError> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn init_schema(db: &Connection) -> Result<(), HubError> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                record_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS session_results (
                session_id TEXT NOT NULL,
                origin TEXT NOT NULL,
                result_json TEXT NOT NULL,
                received_at TEXT NOT NULL,
                PRIMARY KEY (session_id, origin)
            )",
            [],
        )?;
        Ok(())
    }

    /// Insert a freshly built session. The id is server-generated before
    /// the call; a primary-key collision surfaces as Conflict, which with
    /// v4 ids effectively never happens.
    pub async fn create(&self, session: &Session) -> Result<(), HubError> {
        let db = self.db.lock().await;
        let json = serde_json::to_string(session)?;
        let res = db.execute(
            "INSERT INTO sessions (id, name, status, record_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.name,
                session.status.as_str(),
                json,
                session.created_at.to_rfc3339()
            ],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(HubError::Conflict(format!(
                    "session id {} already exists",
                    session.id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Session>, HubError> {
        let db = self.db.lock().await;
        Self::get_locked(&db, id)
    }

    fn get_locked(db: &Connection, id: &str) -> Result<Option<Session>, HubError> {
        let mut stmt = db.prepare("SELECT record_json FROM sessions WHERE id = ?1 LIMIT 1")?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&json)?))
        } else {
            Ok(None)
        }
    }

    /// All sessions, newest first.
    pub async fn list(&self) -> Result<Vec<Session>, HubError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT record_json FROM sessions ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            out.push(serde_json::from_str(&json)?);
        }
        Ok(out)
    }

    /// Read-mutate-write under the store lock. The mutator sees the
    /// current record and its edits are persisted in the same critical
    /// section, so concurrent pollers and API deletes serialize cleanly.
    pub async fn update_with<F>(&self, id: &str, mutate: F) -> Result<Option<Session>, HubError>
    where
        F: FnOnce(&mut Session),
    {
        let db = self.db.lock().await;
        let Some(mut session) = Self::get_locked(&db, id)? else {
            return Ok(None);
        };
        mutate(&mut session);
        let json = serde_json::to_string(&session)?;
        db.execute(
            "UPDATE sessions SET status = ?1, record_json = ?2 WHERE id = ?3",
            params![session.status.as_str(), json, id],
        )?;
        Ok(Some(session))
    }

    /// Soft-delete: the record stays for audit with status `deleted`.
    /// Deleting a missing or already-deleted session is success.
    pub async fn mark_deleted(&self, id: &str) -> Result<(), HubError> {
        self.update_with(id, |s| {
            s.status = SessionStatus::Deleted;
            if s.finished_at.is_none() {
                s.finished_at = Some(Utc::now());
            }
        })
        .await?;
        Ok(())
    }

    // --- Result storage ---

    pub async fn put_result(
        &self,
        session_id: &str,
        origin: ResultOrigin,
        result: &SessionResult,
    ) -> Result<(), HubError> {
        let db = self.db.lock().await;
        let json = serde_json::to_string(result)?;
        db.execute(
            "INSERT OR REPLACE INTO session_results (session_id, origin, result_json, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, origin.as_str(), json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn get_result(
        &self,
        session_id: &str,
        origin: ResultOrigin,
    ) -> Result<Option<SessionResult>, HubError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT result_json FROM session_results WHERE session_id = ?1 AND origin = ?2 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![session_id, origin.as_str()])?;
        if let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&json)?))
        } else {
            Ok(None)
        }
    }

    pub async fn has_any_result(&self, session_id: &str) -> Result<bool, HubError> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM session_results WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
