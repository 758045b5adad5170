// Dictionary caches shared across pipeline stages.
//
// Both caches are append-only interning tables with incremental flush
// tracking: `flush_pending` serializes only the entries added since the
// previous flush and advances the saved pointer, so repeated flush cycles
// emit each entry exactly once. Restore replays entries in stored order,
// which is required to reproduce identical index assignments on the
// decode side. One instance of each cache is shared by reference across
// every stage of a pipeline.

use std::collections::HashMap;

use log::trace;

use crate::error::{Error, Result};
use crate::record::{self, FieldType};

// ---------------------------------------------------------------------------
// StringCache
// ---------------------------------------------------------------------------

/// Bidirectional string ⇄ index mapping with a monotonic index counter.
///
/// Entries are comma-delimited in the flush blob; strings containing the
/// delimiter are unsupported (the stream is trusted input).
#[derive(Debug, Default)]
pub struct StringCache {
    forward: HashMap<String, u32>,
    entries: Vec<String>,
    saved_ptr: usize,
}

impl StringCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string: returns the existing index on an exact match, or
    /// assigns the next one. Idempotent for repeated identical strings.
    pub fn add(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.forward.get(value) {
            return index;
        }
        let index = self.entries.len() as u32;
        self.forward.insert(value.to_string(), index);
        self.entries.push(value.to_string());
        index
    }

    /// Reverse lookup; `None` for unknown indices.
    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get(index as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.saved_ptr < self.entries.len()
    }

    /// Serialize entries added since the last flush and advance the saved
    /// pointer. Empty when nothing is pending.
    pub fn flush_pending(&mut self) -> Vec<u8> {
        if !self.has_pending() {
            return Vec::new();
        }
        let blob = self.entries[self.saved_ptr..].join(",");
        trace!(
            "string cache flush: {} entries, {} bytes",
            self.entries.len() - self.saved_ptr,
            blob.len()
        );
        self.saved_ptr = self.entries.len();
        blob.into_bytes()
    }

    /// Append entries from a flush blob in stored order. Replaying blobs
    /// in their original write order reproduces identical indices.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let text = std::str::from_utf8(bytes).map_err(|e| Error::MalformedCacheBlob {
            reason: format!("string cache blob is not UTF-8: {e}"),
        })?;
        for entry in text.split(',') {
            self.add(entry);
        }
        self.saved_ptr = self.entries.len();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SchemaCache
// ---------------------------------------------------------------------------

/// schema_hash → ordered `name:type` token list, append-only.
///
/// `add` is an idempotent upsert keyed by hash; collisions are accepted as
/// "same schema" (a known risk, preserved as-is). Flush blobs join a
/// schema's tokens with commas and separate schemas with pipes; restore
/// recomputes each hash from the decoded tokens instead of trusting a
/// persisted value, which is consistent because serialization uses exactly
/// the hashed tokens.
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemas: HashMap<u32, Vec<String>>,
    order: Vec<u32>,
    saved_records: usize,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hash: u32, tokens: Vec<String>) {
        if self.schemas.contains_key(&hash) {
            return;
        }
        self.schemas.insert(hash, tokens);
        self.order.push(hash);
    }

    pub fn get(&self, hash: u32) -> Option<&[String]> {
        self.schemas.get(&hash).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.saved_records < self.order.len()
    }

    pub fn flush_pending(&mut self) -> Vec<u8> {
        if !self.has_pending() {
            return Vec::new();
        }
        let blob = self.order[self.saved_records..]
            .iter()
            .filter_map(|hash| self.schemas.get(hash))
            .map(|tokens| tokens.join(","))
            .collect::<Vec<_>>()
            .join("|");
        trace!(
            "schema cache flush: {} schemas, {} bytes",
            self.order.len() - self.saved_records,
            blob.len()
        );
        self.saved_records = self.order.len();
        blob.into_bytes()
    }

    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let text = std::str::from_utf8(bytes).map_err(|e| Error::MalformedCacheBlob {
            reason: format!("schema blob is not UTF-8: {e}"),
        })?;
        for entry in text.split('|') {
            let tokens: Vec<String> = entry.split(',').map(str::to_string).collect();
            for token in &tokens {
                let ty = token
                    .rsplit_once(':')
                    .map(|(_, ty)| ty)
                    .ok_or_else(|| Error::MalformedCacheBlob {
                        reason: format!("schema token '{token}' has no ':' separator"),
                    })?;
                if FieldType::parse(ty).is_none() {
                    return Err(Error::MalformedCacheBlob {
                        reason: format!("unknown field type '{ty}' in schema token '{token}'"),
                    });
                }
            }
            let hash = record::schema_hash(&tokens);
            self.add(hash, tokens);
        }
        self.saved_records = self.order.len();
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
    fn string_add_is_idempotent_and_monotonic() {
        let mut cache = StringCache::new();
        assert_eq!(cache.add("ACME"), 0);
        assert_eq!(cache.add("GLOBEX"), 1);
        assert_eq!(cache.add("ACME"), 0);
        assert_eq!(cache.add("free_tier"), 2);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(1), Some("GLOBEX"));
        assert_eq!(cache.get(9), None);
    }

    #[test]
    fn string_flush_is_incremental() {
        let mut cache = StringCache::new();
        cache.add("a");
        cache.add("b");
        assert!(cache.has_pending());
        assert_eq!(cache.flush_pending(), b"a,b");
        assert!(!cache.has_pending());
        assert_eq!(cache.flush_pending(), b"");
        cache.add("c");
        assert_eq!(cache.flush_pending(), b"c");
    }

    #[test]
    fn string_flush_restore_reproduces_indices() {
        let mut writer = StringCache::new();
        for s in ["ACME", "GLOBEX", "free_tier"] {
            writer.add(s);
        }
        let first = writer.flush_pending();
        writer.add("INITECH");
        let second = writer.flush_pending();

        let mut reader = StringCache::new();
        reader.restore(&first).unwrap();
        reader.restore(&second).unwrap();
        for s in ["ACME", "GLOBEX", "free_tier", "INITECH"] {
            assert_eq!(reader.add(s), writer.add(s), "index drift for {s}");
        }
        assert!(!reader.has_pending());
    }

    #[test]
    fn string_restore_rejects_invalid_utf8() {
        let mut cache = StringCache::new();
        let err = cache.restore(&[0xFF, 0xFE]).unwrap_err();
        assert!(matches!(err, Error::MalformedCacheBlob { .. }));
    }

    fn tokens(spec: &[(&str, &str)]) -> Vec<String> {
        spec.iter().map(|(n, t)| format!("{n}:{t}")).collect()
    }

    #[test]
    fn schema_add_is_idempotent_by_hash() {
        let mut cache = SchemaCache::new();
        let toks = tokens(&[("date", "date"), ("data.close", "float64")]);
        let hash = record::schema_hash(&toks);
        cache.add(hash, toks.clone());
        cache.add(hash, tokens(&[("other", "int32")]));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(hash), Some(toks.as_slice()));
    }

    #[test]
    fn schema_flush_restore_recomputes_identical_hashes() {
        let mut writer = SchemaCache::new();
        let a = tokens(&[("date", "date"), ("data.close", "float64")]);
        let b = tokens(&[("data.symbol", "string"), ("data.volume_array", "array")]);
        let ha = record::schema_hash(&a);
        let hb = record::schema_hash(&b);
        writer.add(ha, a.clone());
        writer.add(hb, b.clone());
        let blob = writer.flush_pending();
        assert_eq!(
            blob,
            b"date:date,data.close:float64|data.symbol:string,data.volume_array:array"
        );

        let mut reader = SchemaCache::new();
        reader.restore(&blob).unwrap();
        assert_eq!(reader.get(ha), Some(a.as_slice()));
        assert_eq!(reader.get(hb), Some(b.as_slice()));
        assert!(!reader.has_pending());
    }

    #[test]
    fn schema_restore_rejects_malformed_tokens() {
        let mut cache = SchemaCache::new();
        assert!(matches!(
            cache.restore(b"no-separator").unwrap_err(),
            Error::MalformedCacheBlob { .. }
        ));
        assert!(matches!(
            cache.restore(b"x:unknowntype").unwrap_err(),
            Error::MalformedCacheBlob { .. }
        ));
    }

    #[test]
    fn empty_flush_blocks_are_skippable() {
        let mut strings = StringCache::new();
        let mut schemas = SchemaCache::new();
        assert!(strings.flush_pending().is_empty());
        assert!(schemas.flush_pending().is_empty());
        strings.restore(b"").unwrap();
        schemas.restore(b"").unwrap();
        assert!(strings.is_empty());
        assert!(schemas.is_empty());
    }
}
