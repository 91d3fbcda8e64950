//! Storage for profiles, known builders, and pending verifications

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{CredError, Result};
use crate::profiles::{ClientProfile, FreelancerProfile};
use crate::verification::PendingProject;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PROFILES_FILE: &str = "profiles.json";
pub const CLIENTS_FILE: &str = "clients.json";
pub const BUILDERS_FILE: &str = "builders.json";
pub const PENDING_FILE: &str = "pending.json";

pub type ProfileUpdateFn<'a> = &'a mut (dyn FnMut(Option<&FreelancerProfile>) -> FreelancerProfile + Send);

/// Abstraction for storage backends. Wallet keys are passed in already normalized.
pub trait Persistence: Send + Sync {
    fn load_profiles(&self) -> Result<BTreeMap<String, FreelancerProfile>>;

    /// Read-modify-write of one profile, atomic with respect to other writers.
    fn update_profile(&self, wallet: &str, update: ProfileUpdateFn<'_>) -> Result<FreelancerProfile>;

    fn load_clients(&self) -> Result<BTreeMap<String, ClientProfile>>;
    fn save_client(&self, wallet: &str, client: &ClientProfile) -> Result<()>;

    fn load_builders(&self) -> Result<BTreeSet<String>>;
    /// Returns true when the builder was not known before.
    fn add_builder(&self, wallet: &str) -> Result<bool>;

    fn load_pending(&self) -> Result<Vec<PendingProject>>;
    /// Insert or replace the record submitted in `project.tx_hash`.
    fn save_pending(&self, project: &PendingProject) -> Result<()>;
    fn remove_pending(&self, builder: &str, index: u64) -> Result<bool>;

    fn get_profile(&self, wallet: &str) -> Result<Option<FreelancerProfile>> {
        Ok(self.load_profiles()?.remove(wallet))
    }

    fn get_client(&self, wallet: &str) -> Result<Option<ClientProfile>> {
        Ok(self.load_clients()?.remove(wallet))
    }

    fn get_pending(&self, builder: &str, index: u64) -> Result<Option<PendingProject>> {
        Ok(self
            .load_pending()?
            .into_iter()
            .find(|p| p.builder == builder && p.index == Some(index)))
    }
}

/// Open the backend named in the storage config.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn Persistence>> {
    let store: Arc<dyn Persistence> = match config.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::open(&config.data_dir)?),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.sqlite_path)?),
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
    };
    tracing::info!(backend = ?config.backend, "storage.opened");
    Ok(store)
}

// ============================================================================
// JSON files
// ============================================================================

/// Flat JSON files in one directory. Every call re-reads the file it needs, so
/// edits made by other tools are picked up.
pub struct JsonFileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            CredError::StorageError(format!("Failed to create data dir {:?}: {}", dir, e))
        })?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn read<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(T::default());
        }
        let contents = fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&contents)
            .map_err(|e| CredError::StorageError(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Write through a temp file in the same directory, then rename over the target.
    fn write<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.path(file);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path).map_err(|e| {
            CredError::StorageError(format!("Failed to replace {:?}: {}", path, e.error))
        })?;
        Ok(())
    }
}

impl Persistence for JsonFileStore {
    fn load_profiles(&self) -> Result<BTreeMap<String, FreelancerProfile>> {
        let _guard = self.lock.lock();
        self.read(PROFILES_FILE)
    }

    fn update_profile(&self, wallet: &str, update: ProfileUpdateFn<'_>) -> Result<FreelancerProfile> {
        let _guard = self.lock.lock();
        let mut profiles: BTreeMap<String, FreelancerProfile> = self.read(PROFILES_FILE)?;
        let profile = update(profiles.get(wallet));
        profiles.insert(wallet.to_string(), profile.clone());
        self.write(PROFILES_FILE, &profiles)?;
        Ok(profile)
    }

    fn load_clients(&self) -> Result<BTreeMap<String, ClientProfile>> {
        let _guard = self.lock.lock();
        self.read(CLIENTS_FILE)
    }

    fn save_client(&self, wallet: &str, client: &ClientProfile) -> Result<()> {
        let _guard = self.lock.lock();
        let mut clients: BTreeMap<String, ClientProfile> = self.read(CLIENTS_FILE)?;
        clients.insert(wallet.to_string(), client.clone());
        self.write(CLIENTS_FILE, &clients)
    }

    fn load_builders(&self) -> Result<BTreeSet<String>> {
        let _guard = self.lock.lock();
        self.read(BUILDERS_FILE)
    }

    fn add_builder(&self, wallet: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut builders: BTreeSet<String> = self.read(BUILDERS_FILE)?;
        if !builders.insert(wallet.to_string()) {
            return Ok(false);
        }
        self.write(BUILDERS_FILE, &builders)?;
        Ok(true)
    }

    fn load_pending(&self) -> Result<Vec<PendingProject>> {
        let _guard = self.lock.lock();
        self.read(PENDING_FILE)
    }

    fn save_pending(&self, project: &PendingProject) -> Result<()> {
        let _guard = self.lock.lock();
        let mut pending: Vec<PendingProject> = self.read(PENDING_FILE)?;
        match pending.iter_mut().find(|p| p.tx_hash == project.tx_hash) {
            Some(existing) => *existing = project.clone(),
            None => pending.push(project.clone()),
        }
        self.write(PENDING_FILE, &pending)
    }

    fn remove_pending(&self, builder: &str, index: u64) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut pending: Vec<PendingProject> = self.read(PENDING_FILE)?;
        let before = pending.len();
        pending.retain(|p| !(p.builder == builder && p.index == Some(index)));
        if pending.len() == before {
            return Ok(false);
        }
        self.write(PENDING_FILE, &pending)?;
        Ok(true)
    }
}

// ============================================================================
// SQLite
// ============================================================================

pub struct SqliteStore {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CredError::StorageError(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS profiles (
                wallet TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS clients (
                wallet TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS builders (
                wallet TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS pending_projects (
                tx_hash TEXT PRIMARY KEY,
                builder TEXT NOT NULL,
                idx INTEGER,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS pending_projects_builder_idx
                ON pending_projects (builder, idx);",
        )
        .map_err(|e| CredError::StorageError(format!("Failed to create tables: {}", e)))?;

        Ok(SqliteStore {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CredError::StorageError("Mutex poisoned".to_string()))
    }

    fn load_json_rows<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<(String, T)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let data: String = row.get(1)?;
            Ok((key, data))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, data) = row?;
            let value = serde_json::from_str(&data).map_err(|e| {
                CredError::StorageError(format!("Failed to decode row {}: {}", key, e))
            })?;
            out.push((key, value));
        }
        Ok(out)
    }
}

impl Persistence for SqliteStore {
    fn load_profiles(&self) -> Result<BTreeMap<String, FreelancerProfile>> {
        Ok(self
            .load_json_rows("SELECT wallet, data FROM profiles ORDER BY wallet")?
            .into_iter()
            .collect())
    }

    fn update_profile(&self, wallet: &str, update: ProfileUpdateFn<'_>) -> Result<FreelancerProfile> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT data FROM profiles WHERE wallet = ?1",
                params![wallet],
                |row| row.get(0),
            )
            .optional()?;
        let existing: Option<FreelancerProfile> =
            existing.map(|data| serde_json::from_str(&data)).transpose()?;

        let profile = update(existing.as_ref());
        tx.execute(
            "INSERT OR REPLACE INTO profiles (wallet, data) VALUES (?1, ?2)",
            params![wallet, serde_json::to_string(&profile)?],
        )?;
        tx.commit()?;
        Ok(profile)
    }

    fn load_clients(&self) -> Result<BTreeMap<String, ClientProfile>> {
        Ok(self
            .load_json_rows("SELECT wallet, data FROM clients ORDER BY wallet")?
            .into_iter()
            .collect())
    }

    fn save_client(&self, wallet: &str, client: &ClientProfile) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO clients (wallet, data) VALUES (?1, ?2)",
            params![wallet, serde_json::to_string(client)?],
        )?;
        Ok(())
    }

    fn load_builders(&self) -> Result<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT wallet FROM builders")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut builders = BTreeSet::new();
        for row in rows {
            builders.insert(row?);
        }
        Ok(builders)
    }

    fn add_builder(&self, wallet: &str) -> Result<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO builders (wallet) VALUES (?1)",
            params![wallet],
        )?;
        Ok(inserted == 1)
    }

    fn load_pending(&self) -> Result<Vec<PendingProject>> {
        Ok(self
            .load_json_rows::<PendingProject>(
                "SELECT tx_hash, data FROM pending_projects ORDER BY builder, idx, tx_hash",
            )?
            .into_iter()
            .map(|(_, p)| p)
            .collect())
    }

    fn save_pending(&self, project: &PendingProject) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO pending_projects (tx_hash, builder, idx, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                project.tx_hash,
                project.builder,
                project.index.map(|i| i as i64),
                serde_json::to_string(project)?
            ],
        )?;
        Ok(())
    }

    fn remove_pending(&self, builder: &str, index: u64) -> Result<bool> {
        let removed = self.conn()?.execute(
            "DELETE FROM pending_projects WHERE builder = ?1 AND idx = ?2",
            params![builder, index as i64],
        )?;
        Ok(removed > 0)
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    profiles: BTreeMap<String, FreelancerProfile>,
    clients: BTreeMap<String, ClientProfile>,
    builders: BTreeSet<String>,
    pending: Vec<PendingProject>,
}

/// Simple in-memory persistence useful for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<MemoryInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryStore {
    fn load_profiles(&self) -> Result<BTreeMap<String, FreelancerProfile>> {
        Ok(self.inner.lock().profiles.clone())
    }

    fn update_profile(&self, wallet: &str, update: ProfileUpdateFn<'_>) -> Result<FreelancerProfile> {
        let mut inner = self.inner.lock();
        let profile = update(inner.profiles.get(wallet));
        inner.profiles.insert(wallet.to_string(), profile.clone());
        Ok(profile)
    }

    fn load_clients(&self) -> Result<BTreeMap<String, ClientProfile>> {
        Ok(self.inner.lock().clients.clone())
    }

    fn save_client(&self, wallet: &str, client: &ClientProfile) -> Result<()> {
        self.inner
            .lock()
            .clients
            .insert(wallet.to_string(), client.clone());
        Ok(())
    }

    fn load_builders(&self) -> Result<BTreeSet<String>> {
        Ok(self.inner.lock().builders.clone())
    }

    fn add_builder(&self, wallet: &str) -> Result<bool> {
        Ok(self.inner.lock().builders.insert(wallet.to_string()))
    }

    fn load_pending(&self) -> Result<Vec<PendingProject>> {
        Ok(self.inner.lock().pending.clone())
    }

    fn save_pending(&self, project: &PendingProject) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.pending.iter_mut().find(|p| p.tx_hash == project.tx_hash) {
            Some(existing) => *existing = project.clone(),
            None => inner.pending.push(project.clone()),
        }
        Ok(())
    }

    fn remove_pending(&self, builder: &str, index: u64) -> Result<bool> {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner
            .pending
            .retain(|p| !(p.builder == builder && p.index == Some(index)));
        Ok(inner.pending.len() != before)
    }
}
