//! Apply serial numbers.
//!
//! SNs are 63-bit snowflake-style ids: milliseconds since [`SN_EPOCH_MS`]
//! (41 bits), node id (10 bits), per-millisecond sequence (12 bits). Ids from
//! one node are strictly increasing; ids from distinct nodes never collide.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// 2024-01-01T00:00:00Z
pub const SN_EPOCH_MS: u64 = 1_704_067_200_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

pub trait ApplySnGenerator: Send + Sync {
    fn next_sn(&self) -> u64;
}

pub struct SnowflakeSnGenerator {
    node_id: u16,
    // (last millisecond, sequence within it)
    state: Mutex<(u64, u64)>,
}

impl SnowflakeSnGenerator {
    /// Node ids above [`MAX_NODE_ID`] are masked into range.
    pub fn new(node_id: u16) -> Self {
        if node_id > MAX_NODE_ID {
            warn!(
                "Node id {} exceeds {}, using {}",
                node_id,
                MAX_NODE_ID,
                node_id & MAX_NODE_ID
            );
        }
        Self {
            node_id: node_id & MAX_NODE_ID,
            state: Mutex::new((0, 0)),
        }
    }

    /// Generator with a random node id, for single-node deployments that did
    /// not configure one.
    pub fn with_random_node() -> Self {
        Self::new(rand::random::<u16>() & MAX_NODE_ID)
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(SN_EPOCH_MS)
            .saturating_sub(SN_EPOCH_MS)
    }

    fn compose(&self, ms: u64, sequence: u64) -> u64 {
        (ms << (NODE_BITS + SEQUENCE_BITS)) | ((self.node_id as u64) << SEQUENCE_BITS) | sequence
    }
}

impl ApplySnGenerator for SnowflakeSnGenerator {
    fn next_sn(&self) -> u64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (last_ms, sequence) = *state;

        // A clock that steps backwards keeps issuing from the last millisecond
        let mut ms = Self::now_ms().max(last_ms);
        let mut next_sequence = if ms == last_ms { sequence + 1 } else { 0 };

        if next_sequence > MAX_SEQUENCE {
            // Sequence exhausted, borrow the next millisecond
            ms = last_ms + 1;
            next_sequence = 0;
        }

        *state = (ms, next_sequence);
        self.compose(ms, next_sequence)
    }
}

/// Extract the node id an SN was issued by.
pub fn sn_node_id(sn: u64) -> u16 {
    ((sn >> SEQUENCE_BITS) & MAX_NODE_ID as u64) as u16
}
