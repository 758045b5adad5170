// Sliding similarity window.
//
// Keeps a bounded per-linking-key history of recent records and, for each
// arriving record, greedily picks the cheapest representation: the record
// itself, or a delta against the most recent history entry that strictly
// undercuts the running best bit-cost. Chosen representations queue up in
// arrival order; exceeding the global bound evicts the oldest entry to the
// downstream consumer. Two windows chain into double-delta compression:
// stage one fills first_ref, stage two fills second_ref and only searches
// entries that are already deltas.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use log::{debug, trace};

use crate::cache::SchemaCache;
use crate::error::{Error, Result};
use crate::record::Record;

/// History entries examined per search, most recent first.
pub const DEFAULT_SEARCH_DEPTH: usize = 50;
/// Global queued-record bound across all keys.
pub const DEFAULT_MAX_SIZE: usize = 100;
/// Deepest reference offset the 8-bit biased wire field can carry.
const MAX_REF_SPAN: i64 = 128;

/// The single capability the pipeline chains on: intermediate windows and
/// the terminal block sink implement it uniformly.
pub trait RecordSink {
    fn consume(&mut self, record: Record) -> Result<()>;

    /// Flush anything buffered and close the rest of the chain.
    fn close(&mut self) -> Result<()>;
}

/// Which reference slot a window's deltas fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Plain delta against one prior record.
    First,
    /// Delta-of-delta against a second prior record; searches only
    /// entries that are themselves already deltas.
    Second,
}

pub struct SimilarityWindow {
    sink: Box<dyn RecordSink>,
    schema_cache: Rc<RefCell<SchemaCache>>,
    stage: Stage,
    /// Set on the final stage of the pipeline: full records passing
    /// through unimproved get their schema registered for the wire.
    register_schemas: bool,
    search_depth: usize,
    max_size: usize,
    queue: VecDeque<Record>,
    history: HashMap<String, BTreeMap<i64, Record>>,
}

impl SimilarityWindow {
    pub fn new(
        sink: Box<dyn RecordSink>,
        schema_cache: Rc<RefCell<SchemaCache>>,
        stage: Stage,
        register_schemas: bool,
        search_depth: usize,
        max_size: usize,
    ) -> Self {
        Self {
            sink,
            schema_cache,
            stage,
            register_schemas,
            search_depth,
            max_size,
            queue: VecDeque::new(),
            history: HashMap::new(),
        }
    }

    /// The most recent ≤ `depth` history entries for `key`, in arrival
    /// order. Second-stage windows filter to delta entries first.
    pub fn get_similar(&self, key: &str, depth: usize) -> Vec<&Record> {
        let Some(per_key) = self.history.get(key) else {
            return Vec::new();
        };
        let eligible: Vec<&Record> = per_key
            .values()
            .filter(|r| self.stage == Stage::First || r.first_ref != 0)
            .collect();
        let skip = eligible.len().saturating_sub(depth);
        eligible[skip..].to_vec()
    }

    /// Pick the cheapest representation of `record`: itself, or the first
    /// (most recent) same-key, same-schema candidate whose delta strictly
    /// undercuts the running best cost. Candidates beyond the
    /// representable reference span are skipped; a schema mismatch
    /// rejects the candidate, non-fatally.
    pub fn find_closest_to(&self, record: &Record) -> Result<Record> {
        let key = record.linking_key()?;
        let mut best = record.bit_cost();
        let mut found: Option<Record> = None;
        for other in self.get_similar(&key, self.search_depth).iter().rev() {
            if other.rec_id == record.rec_id {
                continue;
            }
            if record.rec_id - other.rec_id > MAX_REF_SPAN {
                continue;
            }
            let candidate = match record.delta(other, self.stage) {
                Ok(candidate) => candidate,
                Err(Error::SchemaMismatch { .. }) => continue,
                Err(e) => return Err(e),
            };
            let cost = candidate.bit_cost();
            if cost < best {
                trace!(
                    "record {}: delta vs {} costs {cost} bits (best was {best})",
                    record.rec_id, other.rec_id
                );
                best = cost;
                found = Some(candidate);
            }
        }
        if found.is_none() && self.register_schemas {
            self.schema_cache
                .borrow_mut()
                .add(record.schema_hash, record.schema_tokens());
        }
        Ok(found.unwrap_or_else(|| record.clone()))
    }

    /// Queue the cheapest representation, remember the untransformed
    /// record in the per-key history, and evict the oldest entry once the
    /// global bound is exceeded.
    pub fn add(&mut self, record: Record) -> Result<()> {
        let chosen = self.find_closest_to(&record)?;
        let key = record.linking_key()?;
        self.queue.push_back(chosen);
        self.history
            .entry(key)
            .or_default()
            .insert(record.rec_id, record);
        if self.queue.len() > self.max_size
            && let Some(evicted) = self.queue.pop_front()
        {
            debug!("window eviction: record {} downstream", evicted.rec_id);
            self.forget(&evicted)?;
            self.sink.consume(evicted)?;
        }
        Ok(())
    }

    fn forget(&mut self, record: &Record) -> Result<()> {
        let key = record.linking_key()?;
        if let Some(per_key) = self.history.get_mut(&key) {
            per_key.remove(&record.rec_id);
            if per_key.is_empty() {
                self.history.remove(&key);
            }
        }
        Ok(())
    }
}

impl RecordSink for SimilarityWindow {
    fn consume(&mut self, record: Record) -> Result<()> {
        self.add(record)
    }

    /// Drain the queue in arrival order to the downstream consumer, then
    /// close it. Without the drain the stream's tail would be lost.
    fn close(&mut self) -> Result<()> {
        while let Some(record) = self.queue.pop_front() {
            self.forget(&record)?;
            self.sink.consume(record)?;
        }
        self.sink.close()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
