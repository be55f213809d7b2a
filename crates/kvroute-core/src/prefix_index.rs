//! Token-level radix tree mapping prompt prefixes to cache blocks and the
//! workers that hold them.
//!
//! Every token of an inserted sequence gets one trie node. At each block
//! boundary (`(i + 1) % block_size == 0`) the node carries the content hash of
//! the whole prefix `tokens[0..=i]`, which is the block id. Because the hash
//! only depends on token content, two workers caching the same prompt prefix
//! share the same block ids and meet in the same nodes.
//!
//! # Concurrency Model
//!
//! One `parking_lot::Mutex` guards the whole tree. Insert and lookup are both
//! O(sequence length), and neither performs I/O, so hold times stay short.
//! Lookups take the lock exclusively because they bump hit counters and
//! access times.
//!
//! The index is append-only: nodes and block ids are never evicted. Only the
//! owner sets change, through [`PrefixCacheIndex::insert`] and
//! [`PrefixCacheIndex::remove_worker`].

use crate::clock::Clock;
use crate::config::{validate_block_size, ConfigError};
use kvroute_algorithms::{BlockHash, PrefixMatch, TokenId, WorkerId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Fold one token into a running FNV-1a hash.
fn hash_token(mut hash: u64, token: TokenId) -> u64 {
    for byte in token.to_le_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Block ids of every complete block of `tokens`, in order.
///
/// The id of block `k` is the FNV-1a hash of `tokens[0..(k + 1) * block_size]`,
/// so it identifies the full prefix, not just the block's own window.
/// A trailing partial block gets no id.
pub fn compute_block_hashes(tokens: &[TokenId], block_size: usize) -> Vec<BlockHash> {
    let block_size = block_size.max(1);
    let mut hashes = Vec::with_capacity(tokens.len() / block_size);
    let mut hash = FNV_OFFSET;
    for (i, &token) in tokens.iter().enumerate() {
        hash = hash_token(hash, token);
        if (i + 1) % block_size == 0 {
            hashes.push(hash);
        }
    }
    hashes
}

/// A trie node keyed by one token id.
#[derive(Debug)]
struct CacheNode {
    children: HashMap<TokenId, CacheNode>,
    /// Block ids completed at this depth (empty off block boundaries).
    blocks: Vec<BlockHash>,
    /// Workers holding the blocks of this node.
    workers: BTreeSet<WorkerId>,
    hits: u64,
    last_access_ms: u64,
}

impl CacheNode {
    fn new(now_ms: u64) -> Self {
        Self {
            children: HashMap::new(),
            blocks: Vec::new(),
            workers: BTreeSet::new(),
            hits: 0,
            last_access_ms: now_ms,
        }
    }
}

// A long prompt is a chain of nodes as deep as the prompt is long; the
// default recursive drop would overflow the stack on very long sequences.
impl Drop for CacheNode {
    fn drop(&mut self) {
        let mut stack: Vec<CacheNode> = self.children.drain().map(|(_, c)| c).collect();
        while let Some(mut node) = stack.pop() {
            stack.extend(node.children.drain().map(|(_, c)| c));
        }
    }
}

/// Statistics snapshot for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Trie nodes, excluding the root.
    pub total_nodes: usize,
    /// Distinct block ids stored in the tree.
    pub total_cached_blocks: usize,
    /// Block-boundary hits served by lookups.
    pub total_hits: u64,
    /// Longest indexed sequence in tokens.
    pub max_depth: usize,
    /// Most recent insert or lookup touching any node.
    pub last_access_ms: u64,
    pub block_size: usize,
}

/// Prefix-matching cache index shared by the router and the completion path.
pub struct PrefixCacheIndex {
    block_size: usize,
    clock: Arc<dyn Clock>,
    root: Mutex<CacheNode>,
}

impl PrefixCacheIndex {
    /// Create an empty index. `block_size` must be a power of two.
    pub fn new(block_size: usize, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        validate_block_size(block_size)?;
        let root = CacheNode::new(clock.now_ms());
        Ok(Self {
            block_size,
            clock,
            root: Mutex::new(root),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Record that `worker_id` holds the KV cache of `tokens`.
    ///
    /// Returns the number of blocks newly attributed to this worker; inserting
    /// the same sequence for the same worker again returns 0.
    pub fn insert(&self, tokens: &[TokenId], worker_id: WorkerId) -> usize {
        let now = self.clock.now_ms();
        let mut root = self.root.lock();
        let mut node: &mut CacheNode = &mut *root;
        let mut hash = FNV_OFFSET;
        let mut inserted = 0;

        for (i, &token) in tokens.iter().enumerate() {
            hash = hash_token(hash, token);
            node = node
                .children
                .entry(token)
                .or_insert_with(|| CacheNode::new(now));
            if (i + 1) % self.block_size == 0 {
                if !node.blocks.contains(&hash) {
                    node.blocks.push(hash);
                }
                if node.workers.insert(worker_id) {
                    inserted += 1;
                }
            }
        }
        node.last_access_ms = now;

        tracing::trace!(
            worker_id,
            tokens = tokens.len(),
            blocks_inserted = inserted,
            "indexed sequence"
        );
        inserted
    }

    /// Walk the tree along `tokens` and report the longest indexed prefix.
    ///
    /// Matching is exact and stops at the first token without a child. Every
    /// block boundary passed contributes its blocks and owners to the result
    /// and counts as a hit on that node.
    pub fn find_longest_prefix(&self, tokens: &[TokenId]) -> PrefixMatch {
        let now = self.clock.now_ms();
        let mut root = self.root.lock();
        let mut node: &mut CacheNode = &mut *root;
        let mut result = PrefixMatch::miss();

        for (i, token) in tokens.iter().enumerate() {
            let Some(child) = node.children.get_mut(token) else {
                break;
            };
            node = child;
            result.matched_tokens = i + 1;
            if (i + 1) % self.block_size == 0 {
                node.hits += 1;
                node.last_access_ms = now;
                result.matched_blocks.extend(node.blocks.iter().copied());
                result
                    .candidate_workers
                    .extend(node.workers.iter().copied());
            }
        }
        result
    }

    /// Drop `worker_id` from every owner set. Returns the number of nodes
    /// that listed it. Blocks stay in the tree.
    pub fn remove_worker(&self, worker_id: WorkerId) -> usize {
        let mut root = self.root.lock();
        let mut touched = 0;
        let mut stack: Vec<&mut CacheNode> = vec![&mut *root];
        while let Some(node) = stack.pop() {
            if node.workers.remove(&worker_id) {
                touched += 1;
            }
            stack.extend(node.children.values_mut());
        }
        touched
    }

    /// Node, block and hit totals, computed by an iterative traversal.
    pub fn get_stats(&self) -> IndexStats {
        let root = self.root.lock();
        let mut stats = IndexStats {
            block_size: self.block_size,
            ..IndexStats::default()
        };
        let mut stack: Vec<(&CacheNode, usize)> =
            root.children.values().map(|c| (c, 1)).collect();
        while let Some((node, depth)) = stack.pop() {
            stats.total_nodes += 1;
            stats.total_cached_blocks += node.blocks.len();
            stats.total_hits += node.hits;
            stats.max_depth = stats.max_depth.max(depth);
            stats.last_access_ms = stats.last_access_ms.max(node.last_access_ms);
            stack.extend(node.children.values().map(|c| (c, depth + 1)));
        }
        stats
    }
}
