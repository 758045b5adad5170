// Pipeline assembly: ties the record model, similarity windows and the
// block layer together.
//
// Encoding chains one or two similarity windows in front of a block sink,
// all sharing one string cache and one schema cache. Records enter as
// (column, value) pairs, are typed and interned, and flow down the chain;
// closing the chain drains every window and dumps the final cycle.
// Decoding reverses the block layer only — windows exist solely to choose
// representations, so the reader needs none.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

use log::debug;

use crate::bits::{
    BitBuffer, BitRead, BitStats, BitWrite, ChunkedBitReader, ChunkedBitWriter,
    DEFAULT_CHUNK_SIZE,
};
use crate::block::{BlockReader, BlockSink, BlockWriter, DEFAULT_BLOCK_CAPACITY};
use crate::cache::{SchemaCache, StringCache};
use crate::error::Result;
use crate::record::{RawValue, Record};
use crate::window::{
    DEFAULT_MAX_SIZE, DEFAULT_SEARCH_DEPTH, RecordSink, SimilarityWindow, Stage,
};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for encoding.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Delta stages: 1 (plain deltas) or 2 (delta-of-delta).
    pub stages: u8,
    /// History entries examined per similarity search.
    pub search_depth: usize,
    /// Records a window may hold before evicting downstream.
    pub max_window: usize,
    /// Records per flush cycle. The decoder must use the same value.
    pub block_capacity: usize,
    /// Chunk size for the streaming sink.
    pub chunk_size: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            stages: 2,
            search_depth: DEFAULT_SEARCH_DEPTH,
            max_window: DEFAULT_MAX_SIZE,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Configuration for decoding. Must agree with the encoder's framing.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub block_capacity: usize,
    pub chunk_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Result of a finished encode. `bytes` is present for in-memory encoders;
/// streaming encoders have already written everything to their sink.
pub struct EncodeOutput {
    pub bytes: Option<Vec<u8>>,
    pub stats: BitStats,
}

pub struct Encoder {
    chain: Box<dyn RecordSink>,
    strings: Rc<RefCell<StringCache>>,
    stats: BitStats,
    buffer: Option<Rc<RefCell<BitBuffer>>>,
    linking_column: String,
    next_rec_id: i64,
}

impl Encoder {
    /// Encoder that accumulates the stream in memory; `finish` returns the
    /// serialized bytes, pad header included.
    pub fn in_memory(linking_column: &str, opts: &EncodeOptions) -> Encoder {
        let buffer = Rc::new(RefCell::new(BitBuffer::new()));
        let stats = buffer.borrow().stats().clone();
        let (chain, strings) = build_chain(Rc::clone(&buffer), opts);
        Encoder {
            chain,
            strings,
            stats,
            buffer: Some(buffer),
            linking_column: linking_column.to_string(),
            next_rec_id: 0,
        }
    }

    /// Encoder that streams chunks to `output` as they fill. The stream
    /// carries no pad header; decode it with [`Decoder::from_reader`].
    pub fn streaming<W: Write + 'static>(
        output: W,
        linking_column: &str,
        opts: &EncodeOptions,
    ) -> Encoder {
        let writer = ChunkedBitWriter::with_chunk_size(output, opts.chunk_size);
        let stats = writer.stats().clone();
        let (chain, strings) = build_chain(writer, opts);
        Encoder {
            chain,
            strings,
            stats,
            buffer: None,
            linking_column: linking_column.to_string(),
            next_rec_id: 0,
        }
    }

    /// Type, intern and feed one record into the pipeline. Records are
    /// numbered in arrival order.
    pub fn add_pairs(&mut self, pairs: Vec<(String, RawValue)>) -> Result<()> {
        let mut record = Record::from_pairs(self.next_rec_id, &self.linking_column, pairs)?;
        record.intern_strings(&mut self.strings.borrow_mut());
        self.next_rec_id += 1;
        self.chain.consume(record)
    }

    pub fn stats(&self) -> &BitStats {
        &self.stats
    }

    /// Drain the windows, dump the final cycle and close the sink.
    pub fn finish(mut self) -> Result<EncodeOutput> {
        self.chain.close()?;
        debug!(
            "encode finished: {} records, {} tracked bits",
            self.next_rec_id,
            self.stats.total_bits()
        );
        let bytes = self.buffer.map(|b| b.borrow().to_bytes());
        Ok(EncodeOutput {
            bytes,
            stats: self.stats,
        })
    }
}

fn build_chain(
    out: impl BitWrite + 'static,
    opts: &EncodeOptions,
) -> (Box<dyn RecordSink>, Rc<RefCell<StringCache>>) {
    let strings = Rc::new(RefCell::new(StringCache::new()));
    let schemas = Rc::new(RefCell::new(SchemaCache::new()));
    let block = BlockSink::new(
        BlockWriter::new(out, Rc::clone(&strings), Rc::clone(&schemas)),
        opts.block_capacity,
    );
    // The stage closest to the sink registers schemas: a record reaching
    // it unimproved is about to hit the wire in full form.
    let chain: Box<dyn RecordSink> = if opts.stages >= 2 {
        let second = SimilarityWindow::new(
            Box::new(block),
            Rc::clone(&schemas),
            Stage::Second,
            true,
            opts.search_depth,
            opts.max_window,
        );
        Box::new(SimilarityWindow::new(
            Box::new(second),
            schemas,
            Stage::First,
            false,
            opts.search_depth,
            opts.max_window,
        ))
    } else {
        Box::new(SimilarityWindow::new(
            Box::new(block),
            schemas,
            Stage::First,
            true,
            opts.search_depth,
            opts.max_window,
        ))
    };
    (chain, strings)
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

pub struct Decoder<R: BitRead> {
    reader: BlockReader<R>,
    strings: Rc<RefCell<StringCache>>,
}

impl Decoder<BitBuffer> {
    /// Decode an in-memory stream produced by [`Encoder::in_memory`].
    pub fn from_bytes(bytes: &[u8], opts: &DecodeOptions) -> Result<Self> {
        Ok(Self::over(BitBuffer::from_bytes(bytes)?, opts))
    }
}

impl<R: Read> Decoder<ChunkedBitReader<R>> {
    /// Decode a headerless chunked stream produced by
    /// [`Encoder::streaming`].
    pub fn from_reader(source: R, opts: &DecodeOptions) -> Self {
        Self::over(
            ChunkedBitReader::with_chunk_size(source, opts.chunk_size),
            opts,
        )
    }
}

impl<R: BitRead> Decoder<R> {
    fn over(input: R, opts: &DecodeOptions) -> Self {
        let strings = Rc::new(RefCell::new(StringCache::new()));
        let schemas = Rc::new(RefCell::new(SchemaCache::new()));
        Decoder {
            reader: BlockReader::new(input, Rc::clone(&strings), schemas, opts.block_capacity),
            strings,
        }
    }

    /// All reconstructed records, in stream order.
    pub fn read_all(&mut self) -> Result<Vec<Record>> {
        self.reader.read_all()
    }

    /// Per-metric bit accounting gathered while decoding.
    pub fn stats(&self) -> &BitStats {
        self.reader.stats()
    }

    /// All records materialized back into (column, value) pairs.
    pub fn read_pairs(&mut self) -> Result<Vec<Vec<(String, RawValue)>>> {
        let records = self.read_all()?;
        let strings = self.strings.borrow();
        records.iter().map(|r| r.to_pairs(&strings)).collect()
    }
}

// ---------------------------------------------------------------------------
// Convenience entry points
// ---------------------------------------------------------------------------

/// Encode a full sequence of records in memory.
pub fn encode_records(
    linking_column: &str,
    records: Vec<Vec<(String, RawValue)>>,
    opts: &EncodeOptions,
) -> Result<(Vec<u8>, BitStats)> {
    let mut enc = Encoder::in_memory(linking_column, opts);
    for pairs in records {
        enc.add_pairs(pairs)?;
    }
    let out = enc.finish()?;
    Ok((out.bytes.unwrap_or_default(), out.stats))
}

/// Decode a full in-memory stream back to records.
pub fn decode_records(bytes: &[u8], opts: &DecodeOptions) -> Result<Vec<Record>> {
    Decoder::from_bytes(bytes, opts)?.read_all()
}

/// Decode a full in-memory stream back to (column, value) pairs.
pub fn decode_pairs(bytes: &[u8], opts: &DecodeOptions) -> Result<Vec<Vec<(String, RawValue)>>> {
    Decoder::from_bytes(bytes, opts)?.read_pairs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
