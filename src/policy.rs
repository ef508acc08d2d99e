use std::collections::HashSet;

/// Decides which peers may swap with this node and for how much.
pub trait Policy: Send + Sync {
    fn is_peer_allowed(&self, peer_id: &str) -> bool;

    fn accepts_swap(&self, peer_id: &str, amount_sat: u64) -> bool {
        let _ = amount_sat;
        self.is_peer_allowed(peer_id)
    }
}

/// Allowlist policy with optional amount bounds.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    pub accept_all_peers: bool,
    pub allowlisted_peers: HashSet<String>,
    pub min_swap_amount_sat: u64,
    pub max_swap_amount_sat: Option<u64>,
}

impl StaticPolicy {
    pub fn accept_all() -> Self {
        Self {
            accept_all_peers: true,
            ..Self::default()
        }
    }

    pub fn allowlist<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowlisted_peers: peers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Policy for StaticPolicy {
    fn is_peer_allowed(&self, peer_id: &str) -> bool {
        self.accept_all_peers || self.allowlisted_peers.contains(peer_id)
    }

    fn accepts_swap(&self, peer_id: &str, amount_sat: u64) -> bool {
        self.is_peer_allowed(peer_id)
            && amount_sat >= self.min_swap_amount_sat
            && self.max_swap_amount_sat.is_none_or(|max| amount_sat <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_and_amount_bounds() {
        let mut policy = StaticPolicy::allowlist(["bob"]);
        policy.max_swap_amount_sat = Some(1_000);
        assert!(policy.accepts_swap("bob", 1_000));
        assert!(!policy.accepts_swap("bob", 1_001));
        assert!(!policy.accepts_swap("carol", 10));
        assert!(StaticPolicy::accept_all().accepts_swap("carol", 10));
    }
}
