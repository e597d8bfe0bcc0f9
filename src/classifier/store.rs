//! Embedded SQLite store for cookie descriptors.
//!
//! One database file per user, shared by every project. A single connection
//! is held behind a mutex: statements serialize, which keeps concurrent
//! workers safe without a pool. Name resolution is exact match first, then
//! glob patterns (`*` wildcard) in primary-key order.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use md5::{Digest as _, Md5};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use super::descriptor::{CookieCategory, CookieDescriptor, DescriptorSource, PrivacyImpact};

const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cookies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    vendor TEXT,
    category TEXT NOT NULL DEFAULT 'Unknown',
    purpose TEXT,
    privacy_impact TEXT,
    is_third_party INTEGER NOT NULL DEFAULT 0,
    typical_expiration TEXT,
    common_domains TEXT,
    notes TEXT,
    confidence_score REAL NOT NULL DEFAULT 0.0,
    source TEXT NOT NULL DEFAULT 'ai',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cookie_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern TEXT NOT NULL UNIQUE,
    cookie_id INTEGER NOT NULL REFERENCES cookies(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS ai_query_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cookie_name TEXT NOT NULL,
    domain TEXT,
    query_hash TEXT NOT NULL UNIQUE,
    raw_response TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_corrections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cookie_name TEXT NOT NULL,
    field TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    corrected_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store schema version mismatch: expected {expected}, got {got}")]
    SchemaVersionMismatch { expected: u32, got: u32 },
}

/// Count-and-group statistics over the store contents.
#[derive(Debug, Clone, Default)]
pub struct StoreStatistics {
    pub total_cookies: u64,
    pub total_patterns: u64,
    pub cached_ai_responses: u64,
    pub by_category: Vec<(String, u64)>,
}

/// Thread-safe handle over the embedded database.
pub struct CookieStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl CookieStore {
    /// Default database location under the per-user home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".burp-cookie-db")
            .join("cookies.db")
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(Self::default_path())
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(&path)?;
        Self::from_connection(conn, path)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored.and_then(|v| v.parse::<u32>().ok()) {
            Some(version) if version != SCHEMA_VERSION => {
                return Err(StoreError::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION,
                    got: version,
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO settings (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
        }

        log::info!("cookie store opened: {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or overwrite the descriptor keyed by its unique name.
    pub fn upsert(&self, descriptor: &CookieDescriptor) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO cookies (name, vendor, category, purpose, privacy_impact, \
             is_third_party, typical_expiration, common_domains, notes, confidence_score, \
             source, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12) \
             ON CONFLICT(name) DO UPDATE SET \
             vendor = excluded.vendor, \
             category = excluded.category, \
             purpose = excluded.purpose, \
             privacy_impact = excluded.privacy_impact, \
             is_third_party = excluded.is_third_party, \
             typical_expiration = excluded.typical_expiration, \
             common_domains = excluded.common_domains, \
             notes = excluded.notes, \
             confidence_score = excluded.confidence_score, \
             source = excluded.source, \
             updated_at = excluded.updated_at",
            params![
                descriptor.name,
                descriptor.vendor,
                descriptor.category.as_str(),
                descriptor.purpose,
                descriptor.privacy_impact.as_str(),
                descriptor.third_party,
                descriptor.typical_expiration,
                descriptor.common_domains.join(","),
                descriptor.notes,
                descriptor.confidence,
                descriptor.source.as_str(),
                now,
            ],
        )?;
        Ok(())
    }

    /// Resolve a cookie name: exact match first, then the first matching glob
    /// pattern in primary-key order. The domain is carried for the query-hash
    /// audit cache only; resolution is by name.
    pub fn lookup(&self, name: &str, _domain: &str) -> Result<Option<CookieDescriptor>, StoreError> {
        if let Some(found) = self.lookup_exact(name)? {
            return Ok(Some(found));
        }
        self.lookup_pattern(name)
    }

    pub fn lookup_exact(&self, name: &str) -> Result<Option<CookieDescriptor>, StoreError> {
        let conn = self.lock();
        let found = conn
            .query_row(
                "SELECT * FROM cookies WHERE name = ?1",
                params![name],
                descriptor_from_row,
            )
            .optional()?;
        Ok(found)
    }

    pub fn lookup_pattern(&self, name: &str) -> Result<Option<CookieDescriptor>, StoreError> {
        let conn = self.lock();
        let found = conn
            .query_row(
                "SELECT c.* FROM cookies c \
                 JOIN cookie_patterns p ON c.id = p.cookie_id \
                 WHERE ?1 LIKE REPLACE(p.pattern, '*', '%') \
                 ORDER BY p.id LIMIT 1",
                params![name],
                descriptor_from_row,
            )
            .optional()?;
        if let Some(ref descriptor) = found {
            log::debug!("pattern match: {name} resolved to {}", descriptor.name);
        }
        Ok(found)
    }

    pub fn list_all(&self) -> Result<Vec<CookieDescriptor>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT * FROM cookies ORDER BY name")?;
        let rows = stmt.query_map([], descriptor_from_row)?;
        let mut cookies = Vec::new();
        for row in rows {
            cookies.push(row?);
        }
        Ok(cookies)
    }

    /// Overwrite a descriptor after recording one audit row per changed
    /// field. Returns `false` when the cookie does not exist.
    pub fn apply_correction(&self, updated: &CookieDescriptor) -> Result<bool, StoreError> {
        let Some(existing) = self.lookup_exact(&updated.name)? else {
            return Ok(false);
        };

        let now = Utc::now().to_rfc3339();
        let changes = field_changes(&existing, updated);
        {
            let conn = self.lock();
            for (field, old_value, new_value) in &changes {
                conn.execute(
                    "INSERT INTO user_corrections (cookie_name, field, old_value, new_value, corrected_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![updated.name, field, old_value, new_value, now],
                )?;
            }
        }

        self.upsert(updated)?;
        log::info!(
            "corrected {} field(s) on cookie {}",
            changes.len(),
            updated.name
        );
        Ok(true)
    }

    /// Corrections recorded for one cookie, oldest first.
    pub fn corrections(&self, name: &str) -> Result<Vec<(String, Option<String>, Option<String>)>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT field, old_value, new_value FROM user_corrections \
             WHERE cookie_name = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![name], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        let mut corrections = Vec::new();
        for row in rows {
            corrections.push(row?);
        }
        Ok(corrections)
    }

    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let affected = conn.execute("DELETE FROM cookies WHERE name = ?1", params![name])?;
        Ok(affected > 0)
    }

    /// Register a glob pattern resolving to an existing cookie. Returns
    /// `false` when the target cookie does not exist.
    pub fn add_pattern(&self, cookie_name: &str, pattern: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let cookie_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM cookies WHERE name = ?1",
                params![cookie_name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(cookie_id) = cookie_id else {
            return Ok(false);
        };
        conn.execute(
            "INSERT OR IGNORE INTO cookie_patterns (pattern, cookie_id) VALUES (?1, ?2)",
            params![pattern, cookie_id],
        )?;
        log::debug!("added pattern '{pattern}' for cookie '{cookie_name}'");
        Ok(true)
    }

    /// Keep the raw LM response text for audit, keyed by MD5 of
    /// `name|domain`.
    pub fn cache_raw_response(
        &self,
        name: &str,
        domain: &str,
        raw_response: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO ai_query_cache (cookie_name, domain, query_hash, raw_response, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                name,
                domain,
                query_hash(name, domain),
                raw_response,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn cached_raw_response(&self, name: &str, domain: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock();
        let raw = conn
            .query_row(
                "SELECT raw_response FROM ai_query_cache WHERE query_hash = ?1",
                params![query_hash(name, domain)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw)
    }

    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let conn = self.lock();
        let total_cookies: u64 =
            conn.query_row("SELECT COUNT(*) FROM cookies", [], |row| row.get(0))?;
        let total_patterns: u64 =
            conn.query_row("SELECT COUNT(*) FROM cookie_patterns", [], |row| row.get(0))?;
        let cached_ai_responses: u64 =
            conn.query_row("SELECT COUNT(*) FROM ai_query_cache", [], |row| row.get(0))?;

        let mut stmt =
            conn.prepare("SELECT category, COUNT(*) FROM cookies GROUP BY category")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?;
        let mut by_category = Vec::new();
        for row in rows {
            by_category.push(row?);
        }

        Ok(StoreStatistics {
            total_cookies,
            total_patterns,
            cached_ai_responses,
            by_category,
        })
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store lock poisoned")
    }
}

/// MD5 hex digest of `name|domain`, the audit-cache key.
pub fn query_hash(name: &str, domain: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(domain.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn descriptor_from_row(row: &Row<'_>) -> rusqlite::Result<CookieDescriptor> {
    let category: String = row.get("category")?;
    let privacy: Option<String> = row.get("privacy_impact")?;
    let source: String = row.get("source")?;
    let domains: Option<String> = row.get("common_domains")?;

    Ok(CookieDescriptor {
        id: Some(row.get("id")?),
        name: row.get("name")?,
        vendor: row.get("vendor")?,
        category: CookieCategory::parse_lenient(&category),
        purpose: row.get("purpose")?,
        privacy_impact: privacy
            .as_deref()
            .map(PrivacyImpact::parse_lenient)
            .unwrap_or(PrivacyImpact::Medium),
        third_party: row.get("is_third_party")?,
        typical_expiration: row.get("typical_expiration")?,
        common_domains: domains
            .filter(|joined| !joined.is_empty())
            .map(|joined| joined.split(',').map(|d| d.trim().to_string()).collect())
            .unwrap_or_default(),
        notes: row.get("notes")?,
        confidence: row.get("confidence_score")?,
        source: DescriptorSource::parse_lenient(&source),
        created_at: parse_timestamp(row.get::<_, Option<String>>("created_at")?),
        updated_at: parse_timestamp(row.get::<_, Option<String>>("updated_at")?),
    })
}

fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|text| {
        DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn field_changes(
    existing: &CookieDescriptor,
    updated: &CookieDescriptor,
) -> Vec<(&'static str, Option<String>, Option<String>)> {
    let mut changes = Vec::new();
    let mut push = |field: &'static str, old: Option<String>, new: Option<String>| {
        if old != new {
            changes.push((field, old, new));
        }
    };

    push("vendor", existing.vendor.clone(), updated.vendor.clone());
    push(
        "category",
        Some(existing.category.as_str().to_string()),
        Some(updated.category.as_str().to_string()),
    );
    push("purpose", existing.purpose.clone(), updated.purpose.clone());
    push(
        "privacy_impact",
        Some(existing.privacy_impact.as_str().to_string()),
        Some(updated.privacy_impact.as_str().to_string()),
    );
    push(
        "is_third_party",
        Some(existing.third_party.to_string()),
        Some(updated.third_party.to_string()),
    );
    push(
        "typical_expiration",
        existing.typical_expiration.clone(),
        updated.typical_expiration.clone(),
    );
    push("notes", existing.notes.clone(), updated.notes.clone());
    push(
        "confidence_score",
        Some(existing.confidence.to_string()),
        Some(updated.confidence.to_string()),
    );
    changes
}
