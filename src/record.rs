// Typed record model.
//
// A record is an ordered column-name → field mapping plus its position in
// the sequence and the reference offsets a delta was computed against.
// Field types are inferred from raw value shape with format-parse attempts
// for dates and timestamps; the ordered (name, type) list is fingerprinted
// with a stable 32-bit hash that gates delta comparability and travels on
// the wire for full records.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};

use crate::cache::StringCache;
use crate::codec;
use crate::codec::value::{self, IntWidth};
use crate::error::{Error, Result};
use crate::window::Stage;

/// Wire format of date strings.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Wire format of timestamp strings (dashes in the time part, fractional
/// seconds to microseconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.fZ";
/// Output format for timestamps, always six fractional digits.
pub const TIMESTAMP_OUT_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6fZ";

// ---------------------------------------------------------------------------
// Raw values
// ---------------------------------------------------------------------------

/// A primitive value as supplied by the caller (or materialized on decode).
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl RawValue {
    /// Canonical key form, used to group records by linking value.
    pub fn as_key(&self) -> String {
        match self {
            RawValue::Str(s) => s.clone(),
            RawValue::Int(i) => i.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Bytes(b) => b.iter().map(|x| format!("{x:02x}")).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Field types
// ---------------------------------------------------------------------------

/// Inferred column type; the second half of a schema token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Float64,
    Int32,
    Date,
    Timestamp,
    Str,
    Array,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Float64 => "float64",
            FieldType::Int32 => "int32",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
            FieldType::Str => "string",
            FieldType::Array => "array",
        }
    }

    pub fn parse(s: &str) -> Option<FieldType> {
        Some(match s {
            "float64" => FieldType::Float64,
            "int32" => FieldType::Int32,
            "date" => FieldType::Date,
            "timestamp" => FieldType::Timestamp,
            "string" => FieldType::Str,
            "array" => FieldType::Array,
            _ => return None,
        })
    }

    /// Integer wire width for the int-like types.
    pub fn int_width(self) -> Option<IntWidth> {
        match self {
            FieldType::Date => Some(IntWidth::W16),
            FieldType::Int32 => Some(IntWidth::W32),
            FieldType::Timestamp => Some(IntWidth::W64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stored representations
// ---------------------------------------------------------------------------

/// Canonical stored form of a field value; the operand of delta arithmetic
/// and cost estimation.
#[derive(Debug, Clone, PartialEq)]
pub enum Stored {
    /// int32/date/timestamp values and their signed residues.
    Int(i64),
    /// float64 IEEE-754 pattern or its XOR residue.
    Bits(u64),
    /// Interned string index; 0 doubles as the null/unchanged marker.
    Index(u32),
    /// Byte arrays and their element-wise XOR residues.
    Bytes(Vec<u8>),
    /// A string value before interning; never encoded directly.
    Text(String),
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// One typed column value.
///
/// `stored` drives delta arithmetic and cost estimation. The original raw
/// value is retained on the encode side because window lookups must use
/// untransformed values; decoded fields carry no original until
/// materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub original: Option<RawValue>,
    pub stored: Stored,
    pub ty: FieldType,
    pub linking: bool,
}

impl Field {
    /// Infer the field type from the raw value's shape: floats and byte
    /// arrays map directly, strings are tried as a date and then as a
    /// timestamp, falling back to a plain string.
    pub fn from_raw(value: RawValue) -> Field {
        let (stored, ty) = match &value {
            RawValue::Float(f) => (Stored::Bits(f.to_bits()), FieldType::Float64),
            RawValue::Int(i) => (Stored::Int(*i), FieldType::Int32),
            RawValue::Bytes(b) => (Stored::Bytes(b.clone()), FieldType::Array),
            RawValue::Str(s) => infer_string(s),
        };
        Field {
            original: Some(value),
            stored,
            ty,
            linking: false,
        }
    }

    /// A decoded field: stored form only, original pending materialization.
    pub fn from_stored(stored: Stored, ty: FieldType) -> Field {
        Field {
            original: None,
            stored,
            ty,
            linking: false,
        }
    }

    /// Bits the tagged encoding of this field would produce. Agrees
    /// bit-for-bit with the encoder.
    pub fn bit_cost(&self) -> u32 {
        match (self.ty, &self.stored) {
            (FieldType::Float64, Stored::Bits(b)) => value::estimate_float(*b),
            (FieldType::Int32, Stored::Int(v)) => value::estimate_int(*v, IntWidth::W32),
            (FieldType::Date, Stored::Int(v)) => value::estimate_int(*v, IntWidth::W16),
            (FieldType::Timestamp, Stored::Int(v)) => value::estimate_int(*v, IntWidth::W64),
            (FieldType::Str, Stored::Index(i)) => value::estimate_index(*i),
            // Not yet interned; an assigned index is almost never 0.
            (FieldType::Str, Stored::Text(_)) => 17,
            (FieldType::Array, Stored::Bytes(a)) => value::estimate_bytes(a),
            _ => 0,
        }
    }

    /// Materialize the stored form back into a raw value.
    pub fn to_raw(&self, strings: &StringCache) -> Result<RawValue> {
        match (self.ty, &self.stored) {
            (FieldType::Float64, Stored::Bits(b)) => Ok(RawValue::Float(f64::from_bits(*b))),
            (FieldType::Int32, Stored::Int(v)) => Ok(RawValue::Int(*v)),
            (FieldType::Date, Stored::Int(days)) => {
                let date = NaiveDate::default()
                    .checked_add_signed(TimeDelta::days(*days))
                    .ok_or_else(|| Error::ValueOutOfRange {
                        what: format!("day count {days} is not a representable date"),
                    })?;
                Ok(RawValue::Str(date.format(DATE_FORMAT).to_string()))
            }
            (FieldType::Timestamp, Stored::Int(micros)) => {
                let dt = DateTime::from_timestamp_micros(*micros).ok_or_else(|| {
                    Error::ValueOutOfRange {
                        what: format!("{micros} is not a representable timestamp"),
                    }
                })?;
                Ok(RawValue::Str(
                    dt.naive_utc().format(TIMESTAMP_OUT_FORMAT).to_string(),
                ))
            }
            (FieldType::Str, Stored::Index(i)) => {
                let s = strings
                    .get(*i)
                    .ok_or(Error::UnknownStringIndex(*i))?;
                Ok(RawValue::Str(s.to_string()))
            }
            (FieldType::Str, Stored::Text(s)) => Ok(RawValue::Str(s.clone())),
            (FieldType::Array, Stored::Bytes(b)) => Ok(RawValue::Bytes(b.clone())),
            _ => Err(Error::ValueOutOfRange {
                what: "field stored form does not match its type".to_string(),
            }),
        }
    }
}

fn infer_string(s: &str) -> (Stored, FieldType) {
    if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        let days = date.signed_duration_since(NaiveDate::default()).num_days();
        return (Stored::Int(days), FieldType::Date);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        let micros = dt.and_utc().timestamp_micros();
        return (Stored::Int(micros), FieldType::Timestamp);
    }
    (Stored::Text(s.to_string()), FieldType::Str)
}

// ---------------------------------------------------------------------------
// Schema hashing
// ---------------------------------------------------------------------------

/// FNV-1a over the comma-joined token list. Stable across runs (the hash
/// is wire data, so the process-seeded std hasher is unsuitable); hash
/// collisions are treated as "same schema", a known tradeoff.
pub fn schema_hash(tokens: &[String]) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut h = OFFSET;
    let mut first = true;
    for tok in tokens {
        if !first {
            h = (h ^ u32::from(b',')).wrapping_mul(PRIME);
        }
        first = false;
        for &b in tok.as_bytes() {
            h = (h ^ u32::from(b)).wrapping_mul(PRIME);
        }
    }
    h
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// An ordered collection of typed fields with sequence position and
/// reference offsets. `first_ref`/`second_ref` are non-positive record-id
/// offsets to the reference record(s); both zero means a full record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub rec_id: i64,
    pub linking_column: String,
    pub first_ref: i64,
    pub second_ref: i64,
    pub schema_hash: u32,
    pub columns: Vec<(String, Field)>,
}

impl Record {
    /// Build a record from ordered (dotted column path, raw value) pairs.
    pub fn from_pairs(
        rec_id: i64,
        linking_column: &str,
        pairs: Vec<(String, RawValue)>,
    ) -> Result<Record> {
        let mut columns: Vec<(String, Field)> = pairs
            .into_iter()
            .map(|(name, value)| (name, Field::from_raw(value)))
            .collect();
        let mut linked = false;
        for (name, field) in &mut columns {
            if name == linking_column {
                field.linking = true;
                linked = true;
            }
        }
        if !linked {
            return Err(Error::MissingLinkingColumn {
                column: linking_column.to_string(),
            });
        }
        let mut record = Record {
            rec_id,
            linking_column: linking_column.to_string(),
            first_ref: 0,
            second_ref: 0,
            schema_hash: 0,
            columns,
        };
        record.schema_hash = schema_hash(&record.schema_tokens());
        Ok(record)
    }

    /// `first_ref*8 + second_ref`; zero exactly for full records since
    /// reference offsets are never positive.
    pub fn signature(&self) -> i64 {
        self.first_ref * 8 + self.second_ref
    }

    pub fn is_full(&self) -> bool {
        self.first_ref == 0 && self.second_ref == 0
    }

    /// Ordered `name:type` tokens; the input to the schema hash.
    pub fn schema_tokens(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|(name, field)| format!("{name}:{}", field.ty.as_str()))
            .collect()
    }

    /// The untransformed linking value, usable as a history key. Delta
    /// records keep the original on the linking field exactly for this.
    pub fn linking_key(&self) -> Result<String> {
        self.columns
            .iter()
            .find(|(name, _)| *name == self.linking_column)
            .and_then(|(_, field)| field.original.as_ref())
            .map(RawValue::as_key)
            .ok_or_else(|| Error::MissingLinkingColumn {
                column: self.linking_column.clone(),
            })
    }

    /// Replace string field values with their cache indices.
    pub fn intern_strings(&mut self, strings: &mut StringCache) {
        for (_, field) in &mut self.columns {
            if field.ty == FieldType::Str
                && let Stored::Text(s) = &field.stored
            {
                field.stored = Stored::Index(strings.add(s));
            }
        }
    }

    /// Total encoded bit-cost of all fields.
    pub fn bit_cost(&self) -> u64 {
        self.columns
            .iter()
            .map(|(_, field)| u64::from(field.bit_cost()))
            .sum()
    }

    /// Derive a delta record against `other`, filling the reference slot
    /// for `stage`. Never mutates either input. Requires matching schema
    /// fingerprints; a collision that slips through the hash gate is
    /// caught on the first misaligned column.
    pub fn delta(&self, other: &Record, stage: Stage) -> Result<Record> {
        if self.schema_hash != other.schema_hash {
            return Err(Error::SchemaMismatch {
                ours: self.schema_hash,
                theirs: other.schema_hash,
            });
        }
        let offset = other.rec_id - self.rec_id;
        let (first_ref, second_ref) = match stage {
            Stage::First => (offset, self.second_ref),
            Stage::Second => (self.first_ref, offset),
        };
        let mut columns = Vec::with_capacity(self.columns.len());
        for ((name, ours), (other_name, theirs)) in self.columns.iter().zip(&other.columns) {
            if name != other_name || ours.ty != theirs.ty {
                return Err(Error::SchemaMismatch {
                    ours: self.schema_hash,
                    theirs: other.schema_hash,
                });
            }
            let stored = codec::delta::apply(ours.ty, &ours.stored, &theirs.stored).ok_or(
                Error::SchemaMismatch {
                    ours: self.schema_hash,
                    theirs: other.schema_hash,
                },
            )?;
            columns.push((
                name.clone(),
                Field {
                    original: ours.original.clone(),
                    stored,
                    ty: ours.ty,
                    linking: ours.linking,
                },
            ));
        }
        Ok(Record {
            rec_id: self.rec_id,
            linking_column: self.linking_column.clone(),
            first_ref,
            second_ref,
            schema_hash: self.schema_hash,
            columns,
        })
    }

    /// Undo the delta for `stage` against the reference record, producing
    /// the representation one stage earlier.
    pub fn undelta(&self, reference: &Record, stage: Stage) -> Result<Record> {
        let (first_ref, second_ref) = match stage {
            Stage::First => (0, self.second_ref),
            Stage::Second => (self.first_ref, 0),
        };
        let mut columns = Vec::with_capacity(self.columns.len());
        for ((name, delta), (ref_name, ref_field)) in self.columns.iter().zip(&reference.columns) {
            if name != ref_name || delta.ty != ref_field.ty {
                return Err(Error::SchemaMismatch {
                    ours: self.schema_hash,
                    theirs: reference.schema_hash,
                });
            }
            let stored = codec::delta::invert(delta.ty, &delta.stored, &ref_field.stored).ok_or(
                Error::SchemaMismatch {
                    ours: self.schema_hash,
                    theirs: reference.schema_hash,
                },
            )?;
            columns.push((name.clone(), Field::from_stored(stored, delta.ty)));
        }
        Ok(Record {
            rec_id: self.rec_id,
            linking_column: self.linking_column.clone(),
            first_ref,
            second_ref,
            schema_hash: reference.schema_hash,
            columns,
        })
    }

    /// Materialize all fields back into (column, raw value) pairs.
    pub fn to_pairs(&self, strings: &StringCache) -> Result<Vec<(String, RawValue)>> {
        self.columns
            .iter()
            .map(|(name, field)| Ok((name.clone(), field.to_raw(strings)?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stock_pairs(symbol: &str, close: f64, volume: i64) -> Vec<(String, RawValue)> {
        vec![
            ("date".to_string(), RawValue::Str("2024-03-01".to_string())),
            (
                "timestamp".to_string(),
                RawValue::Str("2024-03-01T09-30-00.000125Z".to_string()),
            ),
            ("data.symbol".to_string(), RawValue::Str(symbol.to_string())),
            ("data.close".to_string(), RawValue::Float(close)),
            ("data.volume".to_string(), RawValue::Int(volume)),
            (
                "data.volume_array".to_string(),
                RawValue::Bytes(volume.to_le_bytes().to_vec()),
            ),
        ]
    }

    #[test]
    fn type_inference_by_shape_and_format() {
        let rec = Record::from_pairs(0, "data.symbol", stock_pairs("ACME", 101.25, 1000)).unwrap();
        let types: Vec<FieldType> = rec.columns.iter().map(|(_, f)| f.ty).collect();
        assert_eq!(
            types,
            vec![
                FieldType::Date,
                FieldType::Timestamp,
                FieldType::Str,
                FieldType::Float64,
                FieldType::Int32,
                FieldType::Array,
            ]
        );
    }

    #[test]
    fn unparsable_strings_fall_back_to_string() {
        let (stored, ty) = infer_string("2024-13-45");
        assert_eq!(ty, FieldType::Str);
        assert_eq!(stored, Stored::Text("2024-13-45".to_string()));
        assert_eq!(infer_string("hello").1, FieldType::Str);
    }

    #[test]
    fn date_and_timestamp_materialize_to_input_text() {
        let strings = StringCache::new();
        let date = Field::from_raw(RawValue::Str("2024-03-01".to_string()));
        assert_eq!(date.ty, FieldType::Date);
        assert_eq!(
            date.to_raw(&strings).unwrap(),
            RawValue::Str("2024-03-01".to_string())
        );

        let ts = Field::from_raw(RawValue::Str("2024-03-01T09-30-00.000125Z".to_string()));
        assert_eq!(ts.ty, FieldType::Timestamp);
        assert_eq!(
            ts.to_raw(&strings).unwrap(),
            RawValue::Str("2024-03-01T09-30-00.000125Z".to_string())
        );
    }

    #[test]
    fn schema_hash_is_stable_and_order_sensitive(){
        let a = vec!["date:date".to_string(), "data.close:float64".to_string()];
        let b = vec!["data.close:float64".to_string(), "date:date".to_string()];
        assert_eq!(schema_hash(&a), schema_hash(&a));
        assert_ne!(schema_hash(&a), schema_hash(&b));
        // Joined-token hashing matches a single-string FNV-1a.
        assert_eq!(schema_hash(&a), schema_hash(&[a.join(",")]));
    }

    #[test]
    fn missing_linking_column_is_an_error() {
        let err = Record::from_pairs(
            0,
            "data.nope",
            vec![("x".to_string(), RawValue::Int(1))],
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingLinkingColumn { .. }));
    }

    #[test]
    fn signature_is_zero_exactly_for_full_records() {
        let mut rec =
            Record::from_pairs(5, "data.symbol", stock_pairs("ACME", 1.0, 1)).unwrap();
        assert_eq!(rec.signature(), 0);
        assert!(rec.is_full());
        rec.first_ref = -1;
        assert_eq!(rec.signature(), -8);
        rec.second_ref = -2;
        assert_eq!(rec.signature(), -10);
        assert!(!rec.is_full());
    }

    #[test]
    fn delta_sets_stage_ref_and_preserves_schema_hash() {
        let mut strings = StringCache::new();
        let mut a = Record::from_pairs(0, "data.symbol", stock_pairs("ACME", 101.0, 1000)).unwrap();
        let mut b = Record::from_pairs(1, "data.symbol", stock_pairs("ACME", 101.5, 1010)).unwrap();
        a.intern_strings(&mut strings);
        b.intern_strings(&mut strings);

        let d = b.delta(&a, Stage::First).unwrap();
        assert_eq!(d.first_ref, -1);
        assert_eq!(d.second_ref, 0);
        assert_eq!(d.schema_hash, b.schema_hash);
        // Untransformed linking value survives on the delta.
        assert_eq!(d.linking_key().unwrap(), "ACME");
        // Inputs untouched.
        assert!(a.is_full());
        assert!(b.is_full());

        let back = d.undelta(&a, Stage::First).unwrap();
        for ((name, orig), (_, rebuilt)) in b.columns.iter().zip(&back.columns) {
            assert_eq!(&orig.stored, &rebuilt.stored, "column {name}");
        }
    }

    #[test]
    fn delta_rejects_schema_mismatch() {
        let a = Record::from_pairs(0, "data.symbol", stock_pairs("ACME", 101.0, 1000)).unwrap();
        let b = Record::from_pairs(
            1,
            "data.symbol",
            vec![
                ("data.symbol".to_string(), RawValue::Str("ACME".to_string())),
                ("data.close".to_string(), RawValue::Float(1.0)),
            ],
        )
        .unwrap();
        let err = b.delta(&a, Stage::First).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn near_equal_records_delta_cheap() {
        let mut strings = StringCache::new();
        let mut a = Record::from_pairs(0, "data.symbol", stock_pairs("ACME", 101.0, 1000)).unwrap();
        let mut b = Record::from_pairs(1, "data.symbol", stock_pairs("ACME", 101.0, 1000)).unwrap();
        a.intern_strings(&mut strings);
        b.intern_strings(&mut strings);
        let d = b.delta(&a, Stage::First).unwrap();
        assert!(
            d.bit_cost() < b.bit_cost(),
            "delta {} should undercut full {}",
            d.bit_cost(),
            b.bit_cost()
        );
        // Identical fields collapse to the 1-bit zero marker each.
        assert_eq!(d.bit_cost(), d.columns.len() as u64);
    }
}
