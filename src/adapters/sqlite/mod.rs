//! SQLite adapter: Implementation of `RecordStore`.
//!
//! Provides local persistence for users, patients and diagnostic history.
//!
//! # Connections
//!
//! Connections come from an r2d2 pool and are returned when the
//! `PooledConnection` guard drops. Every connection enables foreign keys on
//! checkout. Writes that span tables run inside a single transaction; an
//! early return drops the `Transaction`, which rolls it back.
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, types::Type, Connection, OptionalExtension};

use crate::domain::{
    format_ci, HistoryRecord, NewPatient, PatientRecord, PatientSummary, RankedDiagnosis, User,
};
use crate::ports::{RecordStore, SavedAnalysis};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE COLLATE NOCASE,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS patients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ci TEXT NOT NULL UNIQUE,
        complement TEXT,
        name TEXT NOT NULL,
        age INTEGER NOT NULL,
        sex TEXT NOT NULL,
        site TEXT NOT NULL,
        phone TEXT,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id INTEGER NOT NULL REFERENCES patients(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        recorded_at TEXT NOT NULL,
        age INTEGER NOT NULL,
        site TEXT NOT NULL,
        disease1 TEXT NOT NULL,
        prob1 REAL NOT NULL,
        disease2 TEXT NOT NULL,
        prob2 REAL NOT NULL,
        disease3 TEXT NOT NULL,
        prob3 REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_history_patient
        ON history(patient_id, recorded_at DESC);
    CREATE INDEX IF NOT EXISTS idx_history_user
        ON history(user_id);
";

/// SQLite storage adapter backed by a connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` with up to `pool_size`
    /// connections.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::file(path).with_init(init_connection);
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        let store = Self { pool };
        store.pool.get()?.execute_batch("PRAGMA journal_mode = WAL;")?;
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// Each in-memory connection is its own database, so the pool holds
    /// exactly one.
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder().max_size(1).build(manager)?;
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn query_history(conn: &Connection, patient_id: i64) -> Result<Vec<HistoryRecord>, StorageError> {
        let mut stmt = conn.prepare(
            r"
            SELECT h.id, h.recorded_at, h.age, h.site, u.username,
                   h.disease1, h.prob1, h.disease2, h.prob2, h.disease3, h.prob3
            FROM history h
            JOIN users u ON u.id = h.user_id
            WHERE h.patient_id = ?1
            ORDER BY h.recorded_at DESC, h.id DESC
            ",
        )?;

        let history = stmt
            .query_map(params![patient_id], |row| {
                let recorded_at_str: String = row.get(1)?;
                let recorded_at = DateTime::parse_from_rfc3339(&recorded_at_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

                Ok(HistoryRecord {
                    id: row.get(0)?,
                    recorded_at,
                    age: row.get(2)?,
                    site: row.get(3)?,
                    username: row.get(4)?,
                    top3: vec![
                        RankedDiagnosis::new(row.get::<_, String>(5)?, row.get(6)?),
                        RankedDiagnosis::new(row.get::<_, String>(7)?, row.get(8)?),
                        RankedDiagnosis::new(row.get::<_, String>(9)?, row.get(10)?),
                    ],
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(history)
    }
}

fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Escape LIKE wildcards so a search fragment matches literally.
fn like_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl RecordStore for SqliteStore {
    type Error = StorageError;

    fn find_patient(&self, ci: &str) -> Result<Option<PatientRecord>, Self::Error> {
        let conn = self.pool.get()?;

        let patient = conn
            .query_row(
                r"
                SELECT id, ci, complement, name, age, sex, site, phone
                FROM patients WHERE ci = ?1
                ",
                params![ci],
                |row| {
                    Ok(PatientRecord {
                        id: row.get(0)?,
                        ci: row.get(1)?,
                        complement: row.get(2)?,
                        name: row.get(3)?,
                        age: row.get(4)?,
                        sex: row.get(5)?,
                        site: row.get(6)?,
                        phone: row.get(7)?,
                    })
                },
            )
            .optional()?;

        Ok(patient)
    }

    fn search_patients(
        &self,
        ci_fragment: &str,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<PatientSummary>, Self::Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            r"
            SELECT DISTINCT p.ci, p.complement, p.name
            FROM patients p
            JOIN history h ON h.patient_id = p.id
            WHERE h.user_id = ?1 AND p.ci LIKE ?2 ESCAPE '\'
            ORDER BY p.ci
            LIMIT ?3
            ",
        )?;

        let hits = stmt
            .query_map(
                params![user_id, like_pattern(ci_fragment), limit as i64],
                |row| {
                    let ci: String = row.get(0)?;
                    let complement: Option<String> = row.get(1)?;
                    Ok(PatientSummary {
                        ci: format_ci(&ci, complement.as_deref()),
                        name: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(hits)
    }

    fn history_for_patient(&self, patient_id: i64) -> Result<Vec<HistoryRecord>, Self::Error> {
        let conn = self.pool.get()?;
        Self::query_history(&conn, patient_id)
    }

    fn record_analysis(
        &self,
        patient: &NewPatient,
        user_id: i64,
        top3: &[RankedDiagnosis; 3],
    ) -> Result<SavedAnalysis, Self::Error> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = timestamp(Utc::now());

        let user_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![user_id],
            |row| row.get(0),
        )?;
        if !user_exists {
            return Err(StorageError::NotFound(format!("user {user_id}")));
        }

        let patient_id: i64 = tx.query_row(
            r"
            INSERT INTO patients (ci, complement, name, age, sex, site, phone, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(ci) DO UPDATE SET
                complement = excluded.complement,
                name = excluded.name,
                age = excluded.age,
                sex = excluded.sex,
                site = excluded.site,
                phone = excluded.phone,
                updated_at = excluded.updated_at
            RETURNING id
            ",
            params![
                patient.ci,
                patient.complement,
                patient.name,
                patient.age,
                patient.sex,
                patient.site,
                patient.phone,
                now,
            ],
            |row| row.get(0),
        )?;

        tx.execute(
            r"
            INSERT INTO history (
                patient_id, user_id, recorded_at, age, site,
                disease1, prob1, disease2, prob2, disease3, prob3
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            params![
                patient_id,
                user_id,
                now,
                patient.age,
                patient.site,
                top3[0].code,
                top3[0].probability,
                top3[1].code,
                top3[1].probability,
                top3[2].code,
                top3[2].probability,
            ],
        )?;
        let history_id = tx.last_insert_rowid();

        let history = Self::query_history(&tx, patient_id)?;
        tx.commit()?;

        tracing::debug!(patient_id, history_id, "Recorded analysis");
        Ok(SavedAnalysis {
            patient_id,
            history_id,
            history,
        })
    }

    fn find_user(&self, username: &str) -> Result<Option<User>, Self::Error> {
        let conn = self.pool.get()?;

        let user = conn
            .query_row(
                "SELECT id, username, password_hash FROM users WHERE username = ?1",
                params![username.trim()],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(user)
    }

    fn insert_user(&self, username: &str, password_hash: &str) -> Result<i64, Self::Error> {
        let conn = self.pool.get()?;
        let username = username.trim();

        let result = conn.execute(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![username, password_hash, timestamp(Utc::now())],
        );

        match result {
            Ok(_) => {
                tracing::info!("Created user account");
                Ok(conn.last_insert_rowid())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::Conflict(format!("username '{username}' already exists")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
