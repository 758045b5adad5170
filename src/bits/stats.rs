// Per-metric bit accounting for encode sinks.
//
// Every bit sink carries a `BitStats`; the block writer names the unit it is
// about to emit via `set_metric`, and every subsequent `write_bits` call is
// charged to that unit until the metric changes. Handles are reference
// counted so a pipeline buried behind trait objects can still be inspected
// from the outside after it closes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// Metric
// ---------------------------------------------------------------------------

/// The unit classes a wire stream is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    /// Schema-cache flush block.
    SchemaBlock,
    /// String-cache flush block.
    StringCache,
    /// Full (key) record carrying absolute values.
    KeyRecord,
    /// Delta record referencing earlier records.
    DeltaRecord,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::SchemaBlock,
        Metric::StringCache,
        Metric::KeyRecord,
        Metric::DeltaRecord,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::SchemaBlock => "schema block",
            Metric::StringCache => "string cache",
            Metric::KeyRecord => "key record",
            Metric::DeltaRecord => "delta record",
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            Metric::SchemaBlock => 0,
            Metric::StringCache => 1,
            Metric::KeyRecord => 2,
            Metric::DeltaRecord => 3,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BitStats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StatsInner {
    counters: [u64; 4],
    volumes: [u64; 4],
    active: Option<Metric>,
}

/// Shared bit-volume accumulator.
///
/// `Clone` produces another handle to the same counters; the engine keeps
/// one handle while the sink chain keeps another.
#[derive(Debug, Clone, Default)]
pub struct BitStats {
    inner: Rc<RefCell<StatsInner>>,
}

/// One row of [`BitStats::summary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSummary {
    pub metric: Metric,
    /// Number of units charged to this metric.
    pub blocks: u64,
    /// Total bit volume charged to this metric.
    pub bits: u64,
}

impl BitStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new unit of the given class. Subsequent `measure` calls are
    /// charged to it.
    pub fn set_metric(&self, metric: Metric) {
        let mut inner = self.inner.borrow_mut();
        inner.counters[metric.index()] += 1;
        inner.active = Some(metric);
    }

    /// Charge `bits` to the active metric. Bits written before any metric
    /// was set (e.g. the stream pad header) are untracked.
    pub fn measure(&self, bits: u64) {
        let mut inner = self.inner.borrow_mut();
        if let Some(metric) = inner.active {
            inner.volumes[metric.index()] += bits;
        }
    }

    /// Units charged to `metric` so far.
    pub fn blocks(&self, metric: Metric) -> u64 {
        self.inner.borrow().counters[metric.index()]
    }

    /// Bit volume charged to `metric` so far.
    pub fn volume_bits(&self, metric: Metric) -> u64 {
        self.inner.borrow().volumes[metric.index()]
    }

    /// Total tracked bit volume across all metrics.
    pub fn total_bits(&self) -> u64 {
        self.inner.borrow().volumes.iter().sum()
    }

    /// Rows for every metric that saw at least one unit.
    pub fn summary(&self) -> Vec<MetricSummary> {
        let inner = self.inner.borrow();
        Metric::ALL
            .into_iter()
            .filter(|m| inner.counters[m.index()] > 0)
            .map(|m| MetricSummary {
                metric: m,
                blocks: inner.counters[m.index()],
                bits: inner.volumes[m.index()],
            })
            .collect()
    }
}

impl fmt::Display for BitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.summary();
        let mut total_bytes = 0.0f64;
        for row in &rows {
            let bytes = row.bits as f64 / 8.0;
            total_bytes += bytes;
            writeln!(f, "{} : {bytes} bytes", row.metric)?;
        }
        writeln!(f, "total {total_bytes} bytes")?;
        for row in &rows {
            let avg = row.bits as f64 / (8.0 * row.blocks as f64);
            writeln!(
                f,
                "{} : {} block(s), avg size = {avg} bytes/block",
                row.metric, row.blocks
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charges_active_metric() {
        let stats = BitStats::new();
        stats.set_metric(Metric::KeyRecord);
        stats.measure(10);
        stats.measure(6);
        stats.set_metric(Metric::DeltaRecord);
        stats.measure(4);

        assert_eq!(stats.blocks(Metric::KeyRecord), 1);
        assert_eq!(stats.volume_bits(Metric::KeyRecord), 16);
        assert_eq!(stats.blocks(Metric::DeltaRecord), 1);
        assert_eq!(stats.volume_bits(Metric::DeltaRecord), 4);
        assert_eq!(stats.total_bits(), 20);
    }

    #[test]
    fn bits_before_first_metric_are_untracked() {
        let stats = BitStats::new();
        stats.measure(3);
        assert_eq!(stats.total_bits(), 0);
        assert!(stats.summary().is_empty());
    }

    #[test]
    fn clones_share_counters() {
        let stats = BitStats::new();
        let handle = stats.clone();
        stats.set_metric(Metric::SchemaBlock);
        stats.measure(48);
        assert_eq!(handle.volume_bits(Metric::SchemaBlock), 48);
    }

    #[test]
    fn summary_skips_unseen_metrics() {
        let stats = BitStats::new();
        stats.set_metric(Metric::StringCache);
        stats.measure(8);
        let rows = stats.summary();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metric, Metric::StringCache);
        assert_eq!(rows[0].blocks, 1);
        assert_eq!(rows[0].bits, 8);
    }

    #[test]
    fn display_renders_rows() {
        let stats = BitStats::new();
        stats.set_metric(Metric::KeyRecord);
        stats.measure(80);
        let text = stats.to_string();
        assert!(text.contains("key record : 10 bytes"), "{text}");
        assert!(text.contains("total 10 bytes"), "{text}");
        assert!(text.contains("1 block(s)"), "{text}");
    }
}
