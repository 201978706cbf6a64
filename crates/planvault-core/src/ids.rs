//! Plan instance identifiers.
//!
//! `(UniqueName, InstanceId)` names one history record, so an id source must
//! never hand out the same id twice for a plan. [`ProcessCounter`] only
//! guarantees that within one process; [`TimeOrderedIds`] extends it across
//! writers that are configured with distinct node ids.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

pub trait InstanceIdSource: Send + Sync {
    fn next_id(&self, plan_unique_name: &str) -> i64;
}

/// Selects the id source at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstanceIdScheme {
    #[default]
    ProcessCounter,
    TimeOrdered,
}

// ---------------------------------------------------------------------------
// ProcessCounter
// ---------------------------------------------------------------------------

/// 100ns ticks between 0001-01-01 and the Unix epoch.
const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

/// Counter seeded from the clock (in 100ns ticks) and bumped per call.
///
/// Two processes sharing a catalog can collide.
#[derive(Debug)]
pub struct ProcessCounter {
    next: AtomicI64,
}

impl ProcessCounter {
    pub fn new() -> Self {
        let now = Utc::now();
        let ticks = now.timestamp() * 10_000_000 + i64::from(now.timestamp_subsec_nanos() / 100);
        Self::starting_at(TICKS_AT_UNIX_EPOCH + ticks)
    }

    pub fn starting_at(seed: i64) -> Self {
        Self {
            next: AtomicI64::new(seed),
        }
    }
}

impl Default for ProcessCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceIdSource for ProcessCounter {
    fn next_id(&self, _plan_unique_name: &str) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// TimeOrderedIds
// ---------------------------------------------------------------------------

const NODE_BITS: u32 = 10;
const SEQ_BITS: u32 = 12;
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;

/// 2020-01-01T00:00:00Z in Unix milliseconds.
const EPOCH_MS: i64 = 1_577_836_800_000;

/// `| 41 bits ms since 2020 | 10 bits node | 12 bits sequence |`
///
/// Monotonic within the process; distinct node ids keep writers apart.
#[derive(Debug)]
pub struct TimeOrderedIds {
    node: i64,
    last: Mutex<(i64, i64)>,
}

impl TimeOrderedIds {
    pub fn new(node: u16) -> Self {
        Self {
            node: i64::from(node & MAX_NODE_ID),
            last: Mutex::new((0, 0)),
        }
    }

    /// Node id drawn at random; collisions between writers become unlikely
    /// rather than impossible.
    pub fn with_random_node() -> Self {
        Self::new(rand::random::<u16>() & MAX_NODE_ID)
    }

    pub fn node(&self) -> u16 {
        self.node as u16
    }

    fn compose(&self, ms: i64, seq: i64) -> i64 {
        (ms << (NODE_BITS + SEQ_BITS)) | (self.node << SEQ_BITS) | seq
    }
}

impl InstanceIdSource for TimeOrderedIds {
    fn next_id(&self, _plan_unique_name: &str) -> i64 {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = (Utc::now().timestamp_millis() - EPOCH_MS).max(0);
        let (last_ms, last_seq) = *last;

        let (ms, seq) = if now > last_ms {
            (now, 0)
        } else if last_seq < SEQ_MASK {
            (last_ms, last_seq + 1)
        } else {
            // sequence exhausted in this millisecond; borrow the next one
            (last_ms + 1, 0)
        };

        *last = (ms, seq);
        self.compose(ms, seq)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
