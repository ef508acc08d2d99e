use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr as _;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde::{Deserialize, Serialize};

use super::SwapType;
use super::fsm::SwapStateMachine;
use crate::chain::Chain;

/// Durable record of every swap machine.
///
/// `update` must have persisted the machine when it returns: the next state
/// action only runs after that.
pub trait SwapStore: Send + Sync {
    /// Inserts a new swap; fails if the id is already taken.
    fn create(&self, swap: &SwapStateMachine) -> Result<()>;

    fn update(&self, swap: &SwapStateMachine) -> Result<()>;

    fn get(&self, swap_id: &str) -> Result<Option<SwapStateMachine>>;

    fn list(&self) -> Result<Vec<SwapStateMachine>>;
}

/// An inbound swap request this node's policy refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedSwap {
    pub chain: Chain,
    pub amount_sat: u64,
    pub swap_type: SwapType,
}

pub trait RequestedSwapsStore: Send + Sync {
    fn add(&self, peer_id: &str, swap: RequestedSwap) -> Result<()>;

    /// All refused requests, grouped by peer in arrival order.
    fn get_all(&self) -> Result<BTreeMap<String, Vec<RequestedSwap>>>;
}

#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Mutex<Connection>,
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

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SwapStore for SqliteSwapStore {
    fn create(&self, swap: &SwapStateMachine) -> Result<()> {
        let body = serde_json::to_string(swap).context("encode swap")?;
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            r#"
INSERT INTO swaps (
  swap_id,
  swap_type,
  role,
  chain,
  channel_id,
  peer_node_id,
  state,
  created_at,
  body
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
)
"#,
            params![
                &swap.id,
                swap.swap_type.to_string(),
                swap.role.to_string(),
                swap.data.chain.as_str(),
                &swap.data.channel_id,
                &swap.data.peer_node_id,
                swap.current().to_string(),
                swap.data.created_at,
                body,
            ],
        )
        .with_context(|| format!("insert swap {}", swap.id))?;
        Ok(())
    }

    fn update(&self, swap: &SwapStateMachine) -> Result<()> {
        let body = serde_json::to_string(swap).context("encode swap")?;
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let rows = conn
            .execute(
                "UPDATE swaps SET state = ?2, body = ?3 WHERE swap_id = ?1",
                params![&swap.id, swap.current().to_string(), body],
            )
            .with_context(|| format!("update swap {}", swap.id))?;
        anyhow::ensure!(rows == 1, "swap not found: {}", swap.id);
        Ok(())
    }

    fn get(&self, swap_id: &str) -> Result<Option<SwapStateMachine>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM swaps WHERE swap_id = ?1",
                params![swap_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("get swap {swap_id}"))?;
        body.map(|body| {
            serde_json::from_str(&body).with_context(|| format!("decode swap {swap_id}"))
        })
        .transpose()
    }

    fn list(&self) -> Result<Vec<SwapStateMachine>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT swap_id, body FROM swaps ORDER BY created_at, swap_id")
            .context("prepare list swaps")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("query list swaps")?;

        let mut out = Vec::new();
        for row in rows {
            let (swap_id, body) = row.context("read swap row")?;
            out.push(
                serde_json::from_str(&body).with_context(|| format!("decode swap {swap_id}"))?,
            );
        }
        Ok(out)
    }
}

impl RequestedSwapsStore for SqliteSwapStore {
    fn add(&self, peer_id: &str, swap: RequestedSwap) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO requested_swaps (peer_id, chain, amount_sat, swap_type) VALUES (?1, ?2, ?3, ?4)",
            params![
                peer_id,
                swap.chain.as_str(),
                swap.amount_sat,
                swap.swap_type.to_string()
            ],
        )
        .with_context(|| format!("insert requested swap from {peer_id}"))?;
        Ok(())
    }

    fn get_all(&self) -> Result<BTreeMap<String, Vec<RequestedSwap>>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT peer_id, chain, amount_sat, swap_type FROM requested_swaps ORDER BY id")
            .context("prepare list requested swaps")?;

        let rows = stmt
            .query_map([], |row| {
                let peer_id: String = row.get(0)?;
                let chain_str: String = row.get(1)?;
                let amount_sat: i64 = row.get(2)?;
                let swap_type_str: String = row.get(3)?;
                Ok((
                    peer_id,
                    RequestedSwap {
                        chain: chain_from_str(&chain_str, 1)?,
                        amount_sat: u64::try_from(amount_sat).map_err(|_| {
                            rusqlite::Error::FromSqlConversionFailure(
                                2,
                                rusqlite::types::Type::Integer,
                                format!("invalid amount_sat {amount_sat}").into(),
                            )
                        })?,
                        swap_type: swap_type_from_str(&swap_type_str, 3)?,
                    },
                ))
            })
            .context("query list requested swaps")?;

        let mut out: BTreeMap<String, Vec<RequestedSwap>> = BTreeMap::new();
        for row in rows {
            let (peer_id, swap) = row.context("read requested swap row")?;
            out.entry(peer_id).or_default().push(swap);
        }
        Ok(out)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id TEXT PRIMARY KEY,
  swap_type TEXT NOT NULL,
  role TEXT NOT NULL,
  chain TEXT NOT NULL,
  channel_id TEXT NOT NULL,
  peer_node_id TEXT NOT NULL,
  state TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_state_idx ON swaps(state);
CREATE INDEX IF NOT EXISTS swaps_channel_idx ON swaps(channel_id);

CREATE TABLE IF NOT EXISTS requested_swaps (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  peer_id TEXT NOT NULL,
  chain TEXT NOT NULL,
  amount_sat INTEGER NOT NULL,
  swap_type TEXT NOT NULL
);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn chain_from_str(s: &str, col: usize) -> rusqlite::Result<Chain> {
    Chain::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

fn swap_type_from_str(s: &str, col: usize) -> rusqlite::Result<SwapType> {
    match s {
        "swap_out" => Ok(SwapType::SwapOut),
        "swap_in" => Ok(SwapType::SwapIn),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown swap type: {other}").into(),
        )),
    }
}

/// In-process swap store.
#[derive(Debug, Default)]
pub struct MemorySwapStore {
    swaps: Mutex<BTreeMap<String, SwapStateMachine>>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SwapStore for MemorySwapStore {
    fn create(&self, swap: &SwapStateMachine) -> Result<()> {
        let mut swaps = self.swaps.lock().expect("store mutex poisoned");
        anyhow::ensure!(
            !swaps.contains_key(&swap.id),
            "swap already exists: {}",
            swap.id
        );
        swaps.insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    fn update(&self, swap: &SwapStateMachine) -> Result<()> {
        let mut swaps = self.swaps.lock().expect("store mutex poisoned");
        let slot = swaps
            .get_mut(&swap.id)
            .with_context(|| format!("swap not found: {}", swap.id))?;
        *slot = swap.clone();
        Ok(())
    }

    fn get(&self, swap_id: &str) -> Result<Option<SwapStateMachine>> {
        let swaps = self.swaps.lock().expect("store mutex poisoned");
        Ok(swaps.get(swap_id).cloned())
    }

    fn list(&self) -> Result<Vec<SwapStateMachine>> {
        let swaps = self.swaps.lock().expect("store mutex poisoned");
        let mut out: Vec<_> = swaps.values().cloned().collect();
        out.sort_by(|a, b| {
            (a.data.created_at, &a.id).cmp(&(b.data.created_at, &b.id))
        });
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRequestedSwapsStore {
    requests: Mutex<BTreeMap<String, Vec<RequestedSwap>>>,
}

impl MemoryRequestedSwapsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestedSwapsStore for MemoryRequestedSwapsStore {
    fn add(&self, peer_id: &str, swap: RequestedSwap) -> Result<()> {
        self.requests
            .lock()
            .expect("store mutex poisoned")
            .entry(peer_id.to_string())
            .or_default()
            .push(swap);
        Ok(())
    }

    fn get_all(&self) -> Result<BTreeMap<String, Vec<RequestedSwap>>> {
        Ok(self.requests.lock().expect("store mutex poisoned").clone())
    }
}
