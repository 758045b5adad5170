// Typed value codecs and delta operators.
//
// - `value` — stateless encode/decode/estimate per scalar and vector type,
//             all sharing the tagged variable-length scheme
// - `delta` — per-type delta operators and their decode-side inverses

pub mod delta;
pub mod value;

pub use value::IntWidth;
