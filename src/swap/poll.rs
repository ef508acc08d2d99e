//! What peers last told us about themselves through `poll` messages.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::chain::Chain;
use crate::messages::Poll;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub version: u64,
    pub assets: Vec<Chain>,
    /// Whether the peer accepts swaps from us.
    pub peer_allowed: bool,
    pub last_seen: u64,
}

#[derive(Debug, Default)]
pub struct PollRegistry {
    peers: Mutex<BTreeMap<String, PeerInfo>>,
}

impl PollRegistry {
    pub fn record(&self, peer_id: &str, poll: &Poll) {
        let last_seen = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let info = PeerInfo {
            version: poll.version,
            assets: poll.assets.clone(),
            peer_allowed: poll.peer_allowed,
            last_seen,
        };
        self.peers
            .lock()
            .expect("poll registry mutex poisoned")
            .insert(peer_id.to_string(), info);
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerInfo> {
        self.peers
            .lock()
            .expect("poll registry mutex poisoned")
            .get(peer_id)
            .cloned()
    }

    pub fn all(&self) -> BTreeMap<String, PeerInfo> {
        self.peers.lock().expect("poll registry mutex poisoned").clone()
    }
}
