// Wire block layer.
//
// The stream is a sequence of flush cycles. Each cycle carries an optional
// schema block, then an optional string-cache block, then the cycle's
// records. Cache blocks are framed (16-bit tag, 32-bit byte length,
// payload); records are not — the reader is configured with the writer's
// cycle capacity and counts records itself. A record opens with its two
// biased reference bytes, which double as the reader's probe: values 1 and
// 2 at a cycle start are block tags, anything else is the first record's
// reference pair.
//
// Reading resolves references through two bounded histories: the stage-1
// map holds each record as it looked after undoing the second-stage delta,
// the full map holds fully reconstructed records. Entries age out once no
// representable reference can reach them.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

use crate::bits::{BitRead, BitStats, BitWrite, Metric};
use crate::cache::{SchemaCache, StringCache};
use crate::codec::value::{self, IntWidth};
use crate::error::{Error, Result};
use crate::record::{Field, FieldType, Record, Stored};
use crate::window::{RecordSink, Stage};

/// Cycle-start tag of a schema-cache flush block.
pub const SCHEMA_BLOCK: u16 = 1;
/// Cycle-start tag of a string-cache flush block.
pub const STRING_CACHE_BLOCK: u16 = 2;
/// Records buffered per flush cycle before a dump.
pub const DEFAULT_BLOCK_CAPACITY: usize = 100;
/// Bias applied to reference offsets for the 8-bit wire field.
const REF_BIAS: i64 = 128;
/// Decode histories drop entries this far behind the current record id,
/// double the reference span.
const HISTORY_SPAN: i64 = 256;

// ---------------------------------------------------------------------------
// BlockWriter
// ---------------------------------------------------------------------------

/// Serializes cache blocks and records onto a bit sink.
pub struct BlockWriter<W: BitWrite> {
    out: W,
    string_cache: Rc<RefCell<StringCache>>,
    schema_cache: Rc<RefCell<SchemaCache>>,
}

impl<W: BitWrite> BlockWriter<W> {
    pub fn new(
        out: W,
        string_cache: Rc<RefCell<StringCache>>,
        schema_cache: Rc<RefCell<SchemaCache>>,
    ) -> Self {
        Self {
            out,
            string_cache,
            schema_cache,
        }
    }

    /// Emit pending cache entries as framed blocks, schema first. Caches
    /// with nothing pending emit nothing; the reader probes tags instead
    /// of expecting blocks in every cycle.
    pub fn flush_caches(&mut self) -> Result<()> {
        let pending = self.schema_cache.borrow_mut().flush_pending();
        self.write_cache_block(Metric::SchemaBlock, SCHEMA_BLOCK, &pending)?;
        let pending = self.string_cache.borrow_mut().flush_pending();
        self.write_cache_block(Metric::StringCache, STRING_CACHE_BLOCK, &pending)
    }

    fn write_cache_block(&mut self, metric: Metric, tag: u16, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        self.out.set_metric(metric);
        self.out.write_bits(u64::from(tag), 16)?;
        self.out.write_bits(payload.len() as u64, 32)?;
        for &b in payload {
            self.out.write_bits(u64::from(b), 8)?;
        }
        Ok(())
    }

    /// Emit one record: biased reference pair, the schema fingerprint for
    /// full records, then the fields in column order.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.out.set_metric(if record.is_full() {
            Metric::KeyRecord
        } else {
            Metric::DeltaRecord
        });
        self.out.write_bits((record.first_ref + REF_BIAS) as u64, 8)?;
        self.out
            .write_bits((record.second_ref + REF_BIAS) as u64, 8)?;
        if record.is_full() {
            self.out.write_bits(u64::from(record.schema_hash), 32)?;
        }
        for (name, field) in &record.columns {
            self.write_field(name, field)?;
        }
        Ok(())
    }

    fn write_field(&mut self, name: &str, field: &Field) -> Result<()> {
        match (field.ty, &field.stored) {
            (FieldType::Float64, Stored::Bits(b)) => value::encode_float(&mut self.out, *b),
            (FieldType::Str, Stored::Index(i)) => value::encode_index(&mut self.out, *i),
            (FieldType::Array, Stored::Bytes(b)) => value::encode_bytes(&mut self.out, b),
            (FieldType::Int32, Stored::Int(v)) => {
                value::encode_int(&mut self.out, *v, IntWidth::W32)
            }
            (FieldType::Date, Stored::Int(v)) => value::encode_int(&mut self.out, *v, IntWidth::W16),
            (FieldType::Timestamp, Stored::Int(v)) => {
                value::encode_int(&mut self.out, *v, IntWidth::W64)
            }
            (_, Stored::Text(_)) => Err(Error::ValueOutOfRange {
                what: format!("column '{name}' was not interned before encoding"),
            }),
            _ => Err(Error::ValueOutOfRange {
                what: format!("column '{name}' stored form does not match its type"),
            }),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.out.close()
    }
}

// ---------------------------------------------------------------------------
// BlockSink
// ---------------------------------------------------------------------------

/// Terminal record sink: buffers up to `capacity` + 1 records, then dumps
/// the cycle (cache flushes first) to the writer.
pub struct BlockSink<W: BitWrite> {
    writer: BlockWriter<W>,
    capacity: usize,
    buffer: Vec<Record>,
}

impl<W: BitWrite> BlockSink<W> {
    pub fn new(writer: BlockWriter<W>, capacity: usize) -> Self {
        Self {
            writer,
            capacity,
            buffer: Vec::new(),
        }
    }

    fn dump(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        debug!("block dump: {} records", self.buffer.len());
        self.writer.flush_caches()?;
        for record in self.buffer.drain(..) {
            self.writer.write_record(&record)?;
        }
        Ok(())
    }
}

impl<W: BitWrite> RecordSink for BlockSink<W> {
    fn consume(&mut self, record: Record) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() > self.capacity {
            self.dump()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.dump()?;
        self.writer.close()
    }
}

// ---------------------------------------------------------------------------
// BlockReader
// ---------------------------------------------------------------------------

/// Decodes a block stream back into fully reconstructed records.
///
/// `capacity` must match the writer's cycle capacity; the record count per
/// cycle is not on the wire.
pub struct BlockReader<R: BitRead> {
    input: R,
    string_cache: Rc<RefCell<StringCache>>,
    schema_cache: Rc<RefCell<SchemaCache>>,
    capacity: usize,
    stage1: BTreeMap<i64, Record>,
    full: BTreeMap<i64, Record>,
    next_rec_id: i64,
    stats: BitStats,
}

impl<R: BitRead> BlockReader<R> {
    pub fn new(
        input: R,
        string_cache: Rc<RefCell<StringCache>>,
        schema_cache: Rc<RefCell<SchemaCache>>,
        capacity: usize,
    ) -> Self {
        Self {
            input,
            string_cache,
            schema_cache,
            capacity,
            stage1: BTreeMap::new(),
            full: BTreeMap::new(),
            next_rec_id: 0,
            stats: BitStats::new(),
        }
    }

    /// Per-metric bit accounting accumulated while decoding. Field costs
    /// equal the encoder's estimates, so after a full decode these match
    /// the writer's statistics exactly.
    pub fn stats(&self) -> &BitStats {
        &self.stats
    }

    /// Decode every cycle to the end of the stream. Exhaustion at a record
    /// boundary is the clean end; a record always opens with an 8-bit read
    /// and the stream pads with fewer than 8 bits, so truncation inside a
    /// record is distinguishable and reported as an error.
    pub fn read_all(&mut self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        'cycles: loop {
            let Some(mut probe) = self.probe16()? else {
                break;
            };
            if probe == u64::from(SCHEMA_BLOCK) {
                self.stats.set_metric(Metric::SchemaBlock);
                let payload = self.read_payload()?;
                self.stats.measure(48 + payload.len() as u64 * 8);
                self.schema_cache.borrow_mut().restore(&payload)?;
                let Some(next) = self.probe16()? else { break };
                probe = next;
            }
            if probe == u64::from(STRING_CACHE_BLOCK) {
                self.stats.set_metric(Metric::StringCache);
                let payload = self.read_payload()?;
                self.stats.measure(48 + payload.len() as u64 * 8);
                self.string_cache.borrow_mut().restore(&payload)?;
                let Some(next) = self.probe16()? else { break };
                probe = next;
            }
            let first_ref = (probe >> 8) as i64 - REF_BIAS;
            let second_ref = (probe & 0xFF) as i64 - REF_BIAS;
            out.push(self.read_record(first_ref, second_ref)?);
            // A full cycle holds capacity + 1 records; the final cycle may
            // run short and end at any record boundary.
            for _ in 0..self.capacity {
                let hi = match self.input.read_bits(8) {
                    Ok(v) => v,
                    Err(e) if e.is_exhausted() => break 'cycles,
                    Err(e) => return Err(e),
                };
                let lo = self.input.read_bits(8)?;
                out.push(self.read_record(hi as i64 - REF_BIAS, lo as i64 - REF_BIAS)?);
            }
        }
        Ok(out)
    }

    /// A 16-bit read that treats exhaustion as end-of-stream.
    fn probe16(&mut self) -> Result<Option<u64>> {
        match self.input.read_bits(16) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_exhausted() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read_payload(&mut self) -> Result<Vec<u8>> {
        let len = self.input.read_bits(32)? as usize;
        // A corrupt length must not drive a huge allocation.
        if let Some(remaining) = self.input.remaining_hint()
            && len as u64 * 8 > remaining
        {
            return Err(Error::MalformedCacheBlob {
                reason: format!("block length {len} exceeds the remaining stream"),
            });
        }
        let mut payload = Vec::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            payload.push(self.input.read_bits(8)? as u8);
        }
        Ok(payload)
    }

    fn read_record(&mut self, first_ref: i64, second_ref: i64) -> Result<Record> {
        let rec_id = self.next_rec_id;
        self.next_rec_id += 1;

        let full = first_ref == 0 && second_ref == 0;
        self.stats.set_metric(if full {
            Metric::KeyRecord
        } else {
            Metric::DeltaRecord
        });
        self.stats.measure(16);
        let (schema_hash, layout) = if full {
            let hash = self.input.read_bits(32)? as u32;
            self.stats.measure(32);
            (hash, self.schema_layout(hash)?)
        } else {
            // Both references share the record's schema; resolve the
            // layout through whichever is set.
            let offset = if first_ref != 0 { first_ref } else { second_ref };
            let reference = self
                .stage1
                .get(&(rec_id + offset))
                .ok_or(Error::DanglingReference { rec_id, offset })?;
            let layout: Vec<(String, FieldType)> = reference
                .columns
                .iter()
                .map(|(name, field)| (name.clone(), field.ty))
                .collect();
            (reference.schema_hash, layout)
        };

        let mut columns = Vec::with_capacity(layout.len());
        for (name, ty) in layout {
            let stored = self.read_field(ty)?;
            let field = Field::from_stored(stored, ty);
            self.stats.measure(u64::from(field.bit_cost()));
            columns.push((name, field));
        }
        let wire = Record {
            rec_id,
            linking_column: String::new(),
            first_ref,
            second_ref,
            schema_hash,
            columns,
        };

        let stage1_repr = if second_ref != 0 {
            let reference =
                self.stage1
                    .get(&(rec_id + second_ref))
                    .ok_or(Error::DanglingReference {
                        rec_id,
                        offset: second_ref,
                    })?;
            wire.undelta(reference, Stage::Second)?
        } else {
            wire
        };
        self.stage1.insert(rec_id, stage1_repr.clone());

        let resolved = if stage1_repr.first_ref != 0 {
            let offset = stage1_repr.first_ref;
            let reference = self
                .full
                .get(&(rec_id + offset))
                .ok_or(Error::DanglingReference { rec_id, offset })?;
            stage1_repr.undelta(reference, Stage::First)?
        } else {
            stage1_repr
        };
        self.full.insert(rec_id, resolved.clone());
        self.prune(rec_id);
        Ok(resolved)
    }

    fn schema_layout(&self, hash: u32) -> Result<Vec<(String, FieldType)>> {
        let cache = self.schema_cache.borrow();
        let tokens = cache.get(hash).ok_or(Error::UnknownSchemaHash(hash))?;
        tokens
            .iter()
            .map(|token| {
                let (name, ty) =
                    token
                        .rsplit_once(':')
                        .ok_or_else(|| Error::MalformedCacheBlob {
                            reason: format!("schema token '{token}' has no ':' separator"),
                        })?;
                let ty = FieldType::parse(ty).ok_or_else(|| Error::MalformedCacheBlob {
                    reason: format!("unknown field type '{ty}' in schema token '{token}'"),
                })?;
                Ok((name.to_string(), ty))
            })
            .collect()
    }

    fn read_field(&mut self, ty: FieldType) -> Result<Stored> {
        Ok(match ty {
            FieldType::Float64 => Stored::Bits(value::decode_float(&mut self.input)?),
            FieldType::Str => Stored::Index(value::decode_index(&mut self.input)?),
            FieldType::Array => Stored::Bytes(value::decode_bytes(&mut self.input)?),
            FieldType::Int32 => Stored::Int(value::decode_int(&mut self.input, IntWidth::W32)?),
            FieldType::Date => Stored::Int(value::decode_int(&mut self.input, IntWidth::W16)?),
            FieldType::Timestamp => {
                Stored::Int(value::decode_int(&mut self.input, IntWidth::W64)?)
            }
        })
    }

    fn prune(&mut self, rec_id: i64) {
        let cutoff = rec_id - HISTORY_SPAN;
        self.stage1 = self.stage1.split_off(&cutoff);
        self.full = self.full.split_off(&cutoff);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
