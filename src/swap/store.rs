use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, params};
use uuid::Uuid;

use super::{BobState, SwapMetadata};

/// Durable record of every swap: one metadata row plus an append-only log
/// of states. The latest log entry is the resumption point.
#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSwapStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_swap(&mut self, metadata: &SwapMetadata) -> Result<()> {
        let metadata_json =
            serde_json::to_string(metadata).context("serialize swap metadata")?;
        self.conn
            .execute(
                "INSERT INTO swaps (swap_id, metadata) VALUES (?1, ?2)",
                params![metadata.swap_id.to_string(), metadata_json],
            )
            .with_context(|| format!("insert swap {}", metadata.swap_id))?;
        Ok(())
    }

    pub fn get_swap(&self, swap_id: Uuid) -> Result<Option<SwapMetadata>> {
        self.conn
            .query_row(
                "SELECT metadata FROM swaps WHERE swap_id = ?1",
                params![swap_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("get swap {swap_id}"))?
            .map(|json| serde_json::from_str(&json).context("deserialize swap metadata"))
            .transpose()
    }

    /// Append one state to the swap's log. Appending the state that is
    /// already latest is a no-op, so redelivered events leave the log
    /// unchanged.
    ///
    /// The write completes before this returns; callers rely on that
    /// ordering to never act on an unpersisted state.
    pub fn append_state(&mut self, swap_id: Uuid, state: &BobState) -> Result<()> {
        let state_json = serde_json::to_string(state).context("serialize swap state")?;

        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM swap_states WHERE swap_id = ?1 ORDER BY id DESC LIMIT 1",
                params![swap_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("read latest state of swap {swap_id}"))?;
        if latest.as_deref() == Some(state_json.as_str()) {
            return Ok(());
        }

        self.conn
            .execute(
                "INSERT INTO swap_states (swap_id, state_name, state, entered_at)
                 VALUES (?1, ?2, ?3, unixepoch())",
                params![swap_id.to_string(), state.name(), state_json],
            )
            .with_context(|| format!("append state for swap {swap_id}"))?;
        Ok(())
    }

    pub fn latest_state(&self, swap_id: Uuid) -> Result<Option<BobState>> {
        self.conn
            .query_row(
                "SELECT state FROM swap_states WHERE swap_id = ?1 ORDER BY id DESC LIMIT 1",
                params![swap_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("get latest state of swap {swap_id}"))?
            .map(|json| serde_json::from_str(&json).context("deserialize swap state"))
            .transpose()
    }

    /// Full state history of one swap, oldest first.
    pub fn history(&self, swap_id: Uuid) -> Result<Vec<BobState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT state FROM swap_states WHERE swap_id = ?1 ORDER BY id ASC")
            .context("prepare history query")?;

        let rows = stmt
            .query_map(params![swap_id.to_string()], |row| {
                row.get::<_, String>(0)
            })
            .context("query history")?;

        let mut out = Vec::new();
        for row in rows {
            let json = row.context("read history row")?;
            out.push(serde_json::from_str(&json).context("deserialize swap state")?);
        }
        Ok(out)
    }

    pub fn all_swaps(&self) -> Result<Vec<SwapMetadata>> {
        let mut stmt = self
            .conn
            .prepare("SELECT metadata FROM swaps ORDER BY swap_id")
            .context("prepare list swaps")?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query list swaps")?;

        let mut out = Vec::new();
        for row in rows {
            let json = row.context("read swap row")?;
            out.push(serde_json::from_str(&json).context("deserialize swap metadata")?);
        }
        Ok(out)
    }

    /// Swap ids whose latest state is not terminal, for startup resumption.
    pub fn unfinished_swaps(&self) -> Result<Vec<Uuid>> {
        let mut out = Vec::new();
        for metadata in self.all_swaps()? {
            if let Some(state) = self.latest_state(metadata.swap_id)?
                && !state.is_terminal()
            {
                out.push(metadata.swap_id);
            }
        }
        Ok(out)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id TEXT PRIMARY KEY,
  metadata TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS swap_states (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  swap_id TEXT NOT NULL REFERENCES swaps(swap_id),
  state_name TEXT NOT NULL,
  state TEXT NOT NULL,
  entered_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS swap_states_swap_id_idx ON swap_states(swap_id, id);
"#,
    )
    .context("create tables")?;
    Ok(())
}

/// Async facade over the store. All sqlite work runs on the blocking pool;
/// the advisory exclusive-writer discipline comes from the coordinator's
/// single-active-swap slot.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Mutex<SqliteSwapStore>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let store = SqliteSwapStore::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(store)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteSwapStore) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut store = inner.lock().expect("store mutex poisoned");
            op(&mut store)
        })
        .await
        .context("join store call")?
    }

    pub async fn insert_swap(&self, metadata: SwapMetadata) -> Result<()> {
        self.blocking(move |store| store.insert_swap(&metadata)).await
    }

    pub async fn get_swap(&self, swap_id: Uuid) -> Result<Option<SwapMetadata>> {
        self.blocking(move |store| store.get_swap(swap_id)).await
    }

    pub async fn append_state(&self, swap_id: Uuid, state: &BobState) -> Result<()> {
        let state = state.clone();
        self.blocking(move |store| store.append_state(swap_id, &state))
            .await
    }

    pub async fn latest_state(&self, swap_id: Uuid) -> Result<Option<BobState>> {
        self.blocking(move |store| store.latest_state(swap_id)).await
    }

    pub async fn history(&self, swap_id: Uuid) -> Result<Vec<BobState>> {
        self.blocking(move |store| store.history(swap_id)).await
    }

    pub async fn all_swaps(&self) -> Result<Vec<SwapMetadata>> {
        self.blocking(|store| store.all_swaps()).await
    }

    pub async fn unfinished_swaps(&self) -> Result<Vec<Uuid>> {
        self.blocking(|store| store.unfinished_swaps()).await
    }
}
