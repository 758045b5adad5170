// Crate-wide error type.
//
// Encoding is deterministic over in-memory state, so nothing here is
// retryable. The wire format carries no checksums: a stream is assumed
// complete and uncorrupted, and decode errors mean the reader and writer
// disagree about framing or the stream was truncated.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A read ran past the end of the bit stream.
    #[error("bit stream exhausted: requested {requested} bits, {available} available")]
    BufferExhausted { requested: u32, available: u64 },

    /// Delta construction was attempted across records with different
    /// schema fingerprints.
    #[error("schema mismatch: {ours:#010x} vs {theirs:#010x}")]
    SchemaMismatch { ours: u32, theirs: u32 },

    /// A dictionary flush blob could not be parsed on restore.
    #[error("malformed cache blob: {reason}")]
    MalformedCacheBlob { reason: String },

    /// A decoded string index has no entry in the restored string cache.
    #[error("string index {0} not present in cache")]
    UnknownStringIndex(u32),

    /// A full record referenced a schema hash the schema cache has not seen.
    #[error("schema hash {0:#010x} not present in cache")]
    UnknownSchemaHash(u32),

    /// A delta record pointed at a record id outside the decode history.
    #[error("record {rec_id} references offset {offset} outside decode history")]
    DanglingReference { rec_id: i64, offset: i64 },

    /// A record is missing the column configured as its linking key.
    #[error("record has no linking column '{column}'")]
    MissingLinkingColumn { column: String },

    /// A value does not fit the wire representation of its type.
    #[error("value out of range: {what}")]
    ValueOutOfRange { what: String },

    /// Sink or source failure while streaming chunks.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for [`Error::BufferExhausted`], the variant readers probe for
    /// to distinguish clean end-of-stream from mid-item truncation.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::BufferExhausted { .. })
    }
}
