//! Recdelta: delta compression for streams of semi-structured records.
//!
//! The crate provides:
//! - Bit-granular stream I/O with per-metric accounting (`bits`)
//! - Tagged value and delta codecs (`codec`)
//! - The record model, string/schema caches (`record`, `cache`)
//! - The two-stage similarity pipeline and wire format (`window`, `block`)
//! - High-level encode/decode entry points (`engine`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use recdelta::engine::{self, DecodeOptions, EncodeOptions};
//! use recdelta::record::RawValue;
//!
//! let rows = vec![
//!     vec![
//!         ("data.symbol".to_string(), RawValue::Str("ACME".into())),
//!         ("data.close".to_string(), RawValue::Float(101.25)),
//!     ],
//!     vec![
//!         ("data.symbol".to_string(), RawValue::Str("ACME".into())),
//!         ("data.close".to_string(), RawValue::Float(101.75)),
//!     ],
//! ];
//!
//! let (bytes, _stats) =
//!     engine::encode_records("data.symbol", rows.clone(), &EncodeOptions::default()).unwrap();
//! let decoded = engine::decode_pairs(&bytes, &DecodeOptions::default()).unwrap();
//! assert_eq!(decoded, rows);
//! ```

pub mod bits;
pub mod block;
pub mod cache;
pub mod codec;
pub mod engine;
pub mod error;
pub mod record;
pub mod window;

#[cfg(feature = "cli")]
pub mod cli;
