//! Weighted consistent-hash ring.
//!
//! Uses a token ring: every node contributes `weight * VNODES_PER_WEIGHT`
//! virtual nodes, each hashed to a `u64` token. A key is routed to the first
//! virtual node whose token is >= the key hash (wrapping around), the
//! classic Dynamo / Cassandra approach.
//!
//! Two independently constructed rings over the same `{id -> weight}`
//! population produce identical lookups: tokens depend only on node id and
//! replica index, never on insertion order.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use siphasher::sip::SipHasher24;

/// Virtual nodes per unit of weight. Enough tokens that a node's share of
/// the key space tracks its weight within a fraction of a percent.
const VNODES_PER_WEIGHT: usize = 160;

/// Hash an arbitrary key to a `u64` ring token using SipHash-2-4.
pub fn hash_key(key: &str) -> u64 {
    let mut hasher = SipHasher24::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Token of the `replica`-th virtual node of `id`.
fn vnode_token(id: &str, replica: usize) -> u64 {
    let mut hasher = SipHasher24::new();
    id.hash(&mut hasher);
    (replica as u64).hash(&mut hasher);
    hasher.finish()
}

// ─────────────────────────────────────────────
// HashRing
// ─────────────────────────────────────────────

/// A single service-name ring mapping keys to node ids.
#[derive(Clone, Debug, Default)]
pub struct HashRing {
    tokens: BTreeMap<u64, String>,
    weights: HashMap<String, usize>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from an `{id -> weight}` population.
    pub fn with_weights<I>(weights: I) -> Self
    where
        I: IntoIterator<Item = (String, usize)>,
    {
        let mut ring = Self::new();
        for (id, weight) in weights {
            ring.add_weighted(&id, weight);
        }
        ring
    }

    /// Add node `id` with `weight`, replacing any previous registration.
    pub fn add_weighted(&mut self, id: &str, weight: usize) {
        if self.weights.contains_key(id) {
            self.remove(id);
        }
        let weight = weight.max(1);
        for replica in 0..weight * VNODES_PER_WEIGHT {
            self.tokens.insert(vnode_token(id, replica), id.to_string());
        }
        self.weights.insert(id.to_string(), weight);
    }

    /// Remove node `id` and all its virtual nodes.
    pub fn remove(&mut self, id: &str) {
        let Some(weight) = self.weights.remove(id) else {
            return;
        };
        for replica in 0..weight * VNODES_PER_WEIGHT {
            let token = vnode_token(id, replica);
            // Guard against a (vanishingly rare) token collision with
            // another node's virtual node.
            if self.tokens.get(&token).map(String::as_str) == Some(id) {
                self.tokens.remove(&token);
            }
        }
    }

    /// The node owning `key`, or `None` when the ring is empty.
    pub fn get_node(&self, key: &str) -> Option<&str> {
        let token = hash_key(key);
        self.tokens
            .range(token..)
            .next()
            .or_else(|| self.tokens.iter().next())
            .map(|(_, id)| id.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.weights.contains_key(id)
    }

    /// Number of distinct nodes on the ring.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Registered node ids, unordered.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
