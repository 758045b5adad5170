// Command-line interface for recdelta.
//
// Subcommands: compress (JSON lines -> delta stream), decompress (delta
// stream -> JSON lines), gen (sample stock series), info (stream
// statistics). JSON records are flattened one nesting level under "data"
// into dotted column keys before encoding and unflattened on the way out.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process;

use chrono::{NaiveDate, TimeDelta};
use clap::{Args, Parser, Subcommand, ValueHint};
use rand::Rng;

use crate::bits::BitStats;
use crate::block::DEFAULT_BLOCK_CAPACITY;
use crate::engine::{self, DecodeOptions, Decoder, EncodeOptions, Encoder};
use crate::record::{DATE_FORMAT, RawValue, TIMESTAMP_OUT_FORMAT};
use crate::window::{DEFAULT_MAX_SIZE, DEFAULT_SEARCH_DEPTH};

const BUF_SIZE: usize = 64 * 1024;
const DEFAULT_LINKING_COLUMN: &str = "data.symbol";

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Delta codec for semi-structured record streams.
#[derive(Parser, Debug)]
#[command(
    name = "recdelta",
    version,
    about = "Delta codec for semi-structured record streams",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compress JSON lines into a delta stream.
    Compress(CompressArgs),
    /// Decompress a delta stream back into JSON lines.
    Decompress(DecompressArgs),
    /// Generate a sample stock series as JSON lines.
    Gen(GenArgs),
    /// Decode a delta stream and print statistics.
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct TuningArgs {
    /// Delta stages (1 = plain deltas, 2 = delta-of-delta).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2), default_value_t = 2)]
    stages: u8,

    /// History entries examined per similarity search.
    #[arg(long = "search-depth", default_value_t = DEFAULT_SEARCH_DEPTH)]
    search_depth: usize,

    /// Records a window holds before evicting downstream.
    #[arg(long = "window-size", default_value_t = DEFAULT_MAX_SIZE)]
    window_size: usize,

    /// Records per flush cycle (decode must use the same value).
    #[arg(long = "block-capacity", default_value_t = DEFAULT_BLOCK_CAPACITY)]
    block_capacity: usize,
}

impl TuningArgs {
    fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            stages: self.stages,
            search_depth: self.search_depth,
            max_window: self.window_size,
            block_capacity: self.block_capacity,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct CompressArgs {
    /// Column whose value links similar records (dotted path).
    #[arg(long = "linking-column", default_value = DEFAULT_LINKING_COLUMN)]
    linking_column: String,

    /// Stop after this many input records.
    #[arg(long)]
    lines: Option<usize>,

    #[command(flatten)]
    tuning: TuningArgs,

    /// Input JSON-lines file (default: stdin).
    #[arg(value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,

    /// Output delta file (default: stdout).
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DecompressArgs {
    /// Records per flush cycle used at compress time.
    #[arg(long = "block-capacity", default_value_t = DEFAULT_BLOCK_CAPACITY)]
    block_capacity: usize,

    /// Input delta file (default: stdin).
    #[arg(value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,

    /// Output JSON-lines file (default: stdout).
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GenArgs {
    /// Comma-separated ticker symbols.
    #[arg(long, default_value = "ACME,GLOBEX,INITECH")]
    symbols: String,

    /// Trading days to generate per symbol.
    #[arg(long, default_value_t = 30)]
    days: u32,

    /// First date of the series.
    #[arg(long = "start-date", default_value = "2024-01-02")]
    start_date: String,

    /// Output JSON-lines file (default: stdout).
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Records per flush cycle used at compress time.
    #[arg(long = "block-capacity", default_value_t = DEFAULT_BLOCK_CAPACITY)]
    block_capacity: usize,

    /// Input delta file (default: stdin).
    #[arg(value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

fn open_input(path: &Option<PathBuf>) -> Result<Box<dyn BufRead>, i32> {
    match path {
        Some(path) => match File::open(path) {
            Ok(f) => Ok(Box::new(BufReader::with_capacity(BUF_SIZE, f))),
            Err(e) => {
                eprintln!("recdelta: input file: {}: {e}", path.display());
                Err(1)
            }
        },
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn create_output(path: &Option<PathBuf>, force: bool) -> Result<Box<dyn Write>, i32> {
    match path {
        Some(path) => {
            if path.exists() && !force {
                eprintln!(
                    "recdelta: output file exists, use -f to overwrite: {}",
                    path.display()
                );
                return Err(1);
            }
            match File::create(path) {
                Ok(f) => Ok(Box::new(BufWriter::with_capacity(BUF_SIZE, f))),
                Err(e) => {
                    eprintln!("recdelta: output file: {}: {e}", path.display());
                    Err(1)
                }
            }
        }
        None => Ok(Box::new(BufWriter::with_capacity(
            BUF_SIZE,
            io::stdout().lock(),
        ))),
    }
}

fn read_stream(path: &Option<PathBuf>) -> Result<Vec<u8>, i32> {
    let mut reader = open_input(path)?;
    let mut bytes = Vec::new();
    if let Err(e) = reader.read_to_end(&mut bytes) {
        eprintln!("recdelta: read error: {e}");
        return Err(1);
    }
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// JSON flattening
// ---------------------------------------------------------------------------

/// Flatten one nesting level under "data" into dotted column keys and
/// convert JSON values into raw record values.
fn flatten(value: &serde_json::Value) -> Result<Vec<(String, RawValue)>, String> {
    let obj = value.as_object().ok_or("record is not a JSON object")?;
    let mut pairs = Vec::new();
    for (key, val) in obj {
        if key == "data" {
            let data = val.as_object().ok_or("\"data\" is not a JSON object")?;
            for (inner, val) in data {
                pairs.push((format!("data.{inner}"), raw_value(inner, val)?));
            }
        } else {
            pairs.push((key.clone(), raw_value(key, val)?));
        }
    }
    Ok(pairs)
}

fn raw_value(key: &str, val: &serde_json::Value) -> Result<RawValue, String> {
    match val {
        serde_json::Value::String(s) => Ok(RawValue::Str(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(RawValue::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(RawValue::Float(f))
            } else {
                Err(format!("column '{key}': unrepresentable number {n}"))
            }
        }
        serde_json::Value::Array(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let b = item
                    .as_u64()
                    .filter(|&b| b <= 255)
                    .ok_or_else(|| format!("column '{key}': array element is not a byte"))?;
                bytes.push(b as u8);
            }
            Ok(RawValue::Bytes(bytes))
        }
        other => Err(format!("column '{key}': unsupported value {other}")),
    }
}

/// Rebuild the nested JSON object from dotted column pairs.
fn unflatten(pairs: &[(String, RawValue)]) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    let mut data = serde_json::Map::new();
    for (name, value) in pairs {
        match name.strip_prefix("data.") {
            Some(inner) => {
                data.insert(inner.to_string(), json_value(value));
            }
            None => {
                root.insert(name.clone(), json_value(value));
            }
        }
    }
    if !data.is_empty() {
        root.insert("data".to_string(), serde_json::Value::Object(data));
    }
    serde_json::Value::Object(root)
}

fn json_value(value: &RawValue) -> serde_json::Value {
    match value {
        RawValue::Str(s) => serde_json::Value::String(s.clone()),
        RawValue::Int(i) => serde_json::Value::from(*i),
        RawValue::Float(f) => {
            serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        RawValue::Bytes(b) => {
            serde_json::Value::Array(b.iter().map(|&x| serde_json::Value::from(x)).collect())
        }
    }
}

// ---------------------------------------------------------------------------
// Stats printing
// ---------------------------------------------------------------------------

fn print_stats(stats: &BitStats, records: usize, input_bytes: Option<u64>, json: bool) {
    if json {
        let rows: Vec<serde_json::Value> = stats
            .summary()
            .iter()
            .map(|row| {
                serde_json::json!({
                    "metric": row.metric.as_str(),
                    "blocks": row.blocks,
                    "bits": row.bits,
                })
            })
            .collect();
        let json = serde_json::json!({
            "records": records,
            "input_bytes": input_bytes,
            "total_bits": stats.total_bits(),
            "metrics": rows,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => eprintln!("{text}"),
            Err(e) => eprintln!("recdelta: stats serialization: {e}"),
        }
    } else {
        eprintln!("records: {records}");
        if let Some(n) = input_bytes {
            eprintln!("input bytes: {n}");
        }
        eprint!("{stats}");
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_compress(args: &CompressArgs, force: bool, quiet: bool, json: bool) -> i32 {
    let reader = match open_input(&args.input) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let opts = args.tuning.encode_options();
    let mut enc = Encoder::in_memory(&args.linking_column, &opts);
    let mut records = 0usize;
    let mut input_bytes = 0u64;

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("recdelta: read error: {e}");
                return 1;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        input_bytes += line.len() as u64 + 1;
        let value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("recdelta: line {}: invalid JSON: {e}", records + 1);
                return 1;
            }
        };
        let pairs = match flatten(&value) {
            Ok(pairs) => pairs,
            Err(e) => {
                eprintln!("recdelta: line {}: {e}", records + 1);
                return 1;
            }
        };
        if let Err(e) = enc.add_pairs(pairs) {
            eprintln!("recdelta: line {}: {e}", records + 1);
            return 1;
        }
        records += 1;
        if args.lines.is_some_and(|cap| records >= cap) {
            break;
        }
    }

    let out = match enc.finish() {
        Ok(out) => out,
        Err(e) => {
            eprintln!("recdelta: encode error: {e}");
            return 1;
        }
    };
    let bytes = out.bytes.unwrap_or_default();

    let mut writer = match create_output(&args.output, force) {
        Ok(w) => w,
        Err(code) => return code,
    };
    if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
        eprintln!("recdelta: write error: {e}");
        return 1;
    }

    if !quiet {
        print_stats(&out.stats, records, Some(input_bytes), json);
        if !json {
            eprintln!("output bytes: {}", bytes.len());
        }
    }
    0
}

fn cmd_decompress(args: &DecompressArgs, force: bool) -> i32 {
    let bytes = match read_stream(&args.input) {
        Ok(b) => b,
        Err(code) => return code,
    };
    let opts = DecodeOptions {
        block_capacity: args.block_capacity,
        ..Default::default()
    };
    let pairs = match engine::decode_pairs(&bytes, &opts) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("recdelta: decode error: {e}");
            return 1;
        }
    };

    let mut writer = match create_output(&args.output, force) {
        Ok(w) => w,
        Err(code) => return code,
    };
    for record in &pairs {
        let value = unflatten(record);
        if let Err(e) = serde_json::to_writer(&mut writer, &value)
            .map_err(io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
        {
            eprintln!("recdelta: write error: {e}");
            return 1;
        }
    }
    if let Err(e) = writer.flush() {
        eprintln!("recdelta: write error: {e}");
        return 1;
    }
    0
}

fn cmd_gen(args: &GenArgs, force: bool) -> i32 {
    let start = match NaiveDate::parse_from_str(&args.start_date, DATE_FORMAT) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("recdelta: --start-date: {e}");
            return 1;
        }
    };
    let symbols: Vec<&str> = args
        .symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        eprintln!("recdelta: --symbols: no symbols given");
        return 1;
    }

    let mut writer = match create_output(&args.output, force) {
        Ok(w) => w,
        Err(code) => return code,
    };
    let mut rng = rand::rng();
    let mut prices: Vec<f64> = symbols
        .iter()
        .map(|_| rng.random_range(20.0..200.0))
        .collect();

    for day in 0..args.days {
        let Some(date) = start.checked_add_signed(TimeDelta::days(i64::from(day))) else {
            eprintln!("recdelta: date overflow at day {day}");
            return 1;
        };
        for (symbol, price) in symbols.iter().zip(&mut prices) {
            let open = *price;
            let close = round2(open * (1.0 + rng.random_range(-0.02..0.02)));
            let high = round2(open.max(close) * (1.0 + rng.random_range(0.0..0.01)));
            let low = round2(open.min(close) * (1.0 - rng.random_range(0.0..0.01)));
            let volume: i64 = rng.random_range(100_000..5_000_000);
            *price = close;

            // Sub-second jitter within 100 ms, as market feeds drift.
            let micros = rng.random_range(0..100_000);
            let timestamp = date
                .and_hms_micro_opt(0, 0, 0, micros)
                .map(|dt| dt.format(TIMESTAMP_OUT_FORMAT).to_string())
                .unwrap_or_default();

            let line = serde_json::json!({
                "date": date.format(DATE_FORMAT).to_string(),
                "timestamp": timestamp,
                "data_source": "free_tier",
                "data": {
                    "open": round2(open),
                    "high": high,
                    "low": low,
                    "close": close,
                    "adjusted_close": close,
                    "volume": volume,
                    "symbol": symbol,
                    "name": format!("{symbol} Corp."),
                    // Minimal little-endian form; the array codec cannot
                    // carry trailing zero elements.
                    "volume_array": minimal_le_bytes(volume),
                },
            });
            if let Err(e) = serde_json::to_writer(&mut writer, &line)
                .map_err(io::Error::from)
                .and_then(|()| writer.write_all(b"\n"))
            {
                eprintln!("recdelta: write error: {e}");
                return 1;
            }
        }
    }
    if let Err(e) = writer.flush() {
        eprintln!("recdelta: write error: {e}");
        return 1;
    }
    0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn minimal_le_bytes(value: i64) -> Vec<u8> {
    let mut bytes = value.to_le_bytes().to_vec();
    while bytes.len() > 1 && bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

fn cmd_info(args: &InfoArgs, json: bool) -> i32 {
    let bytes = match read_stream(&args.input) {
        Ok(b) => b,
        Err(code) => return code,
    };
    let opts = DecodeOptions {
        block_capacity: args.block_capacity,
        ..Default::default()
    };
    let mut decoder = match Decoder::from_bytes(&bytes, &opts) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("recdelta: bad stream header: {e}");
            return 1;
        }
    };
    let records = match decoder.read_all() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("recdelta: decode error: {e}");
            return 1;
        }
    };
    eprintln!("stream bytes: {}", bytes.len());
    print_stats(decoder.stats(), records.len(), None, json);
    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let exit_code = match &cli.command {
        Cmd::Compress(args) => cmd_compress(args, cli.force, cli.quiet, cli.json_output),
        Cmd::Decompress(args) => cmd_decompress(args, cli.force),
        Cmd::Gen(args) => cmd_gen(args, cli.force),
        Cmd::Info(args) => cmd_info(args, cli.json_output),
    };
    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let argv: Vec<String> = std::iter::once("recdelta".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        Cli::try_parse_from(argv).expect("cli parse failed")
    }

    #[test]
    fn compress_args_parse() {
        let cli = parse(&[
            "--force",
            "compress",
            "--linking-column",
            "data.id",
            "--lines",
            "500",
            "--stages",
            "1",
            "in.jsonl",
            "out.rdelta",
        ]);
        assert!(cli.force);
        let Cmd::Compress(args) = cli.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(args.linking_column, "data.id");
        assert_eq!(args.lines, Some(500));
        assert_eq!(args.tuning.stages, 1);
        assert_eq!(args.input, Some(PathBuf::from("in.jsonl")));
        assert_eq!(args.output, Some(PathBuf::from("out.rdelta")));
    }

    #[test]
    fn stages_out_of_range_is_rejected() {
        let argv = ["recdelta", "compress", "--stages", "3"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn flatten_splits_data_level() {
        let value = serde_json::json!({
            "date": "2024-03-01",
            "data": {
                "close": 101.25,
                "symbol": "ACME",
                "volume": 1000,
                "volume_array": [232, 3, 0, 0, 0, 0, 0, 0],
            },
        });
        let pairs = flatten(&value).unwrap();
        let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"date"));
        assert!(names.contains(&"data.close"));
        assert!(names.contains(&"data.volume_array"));
        let (_, vol) = pairs.iter().find(|(n, _)| n == "data.volume").unwrap();
        assert_eq!(*vol, RawValue::Int(1000));
        let (_, arr) = pairs
            .iter()
            .find(|(n, _)| n == "data.volume_array")
            .unwrap();
        assert_eq!(*arr, RawValue::Bytes(vec![232, 3, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn flatten_unflatten_roundtrip() {
        let value = serde_json::json!({
            "date": "2024-03-01",
            "data_source": "free_tier",
            "data": {
                "close": 101.25,
                "symbol": "ACME",
                "volume": 1000,
            },
        });
        let pairs = flatten(&value).unwrap();
        assert_eq!(unflatten(&pairs), value);
    }

    #[test]
    fn flatten_rejects_non_byte_arrays() {
        let value = serde_json::json!({"data": {"xs": [1, 2, 999]}});
        assert!(flatten(&value).is_err());
        let value = serde_json::json!({"flag": true});
        assert!(flatten(&value).is_err());
    }

    #[test]
    fn compress_then_decompress_json_lines() {
        // End-to-end through the same helpers the commands use.
        let lines = [
            serde_json::json!({
                "date": "2024-03-01",
                "data": {"close": 101.25, "symbol": "ACME", "volume": 1000},
            }),
            serde_json::json!({
                "date": "2024-03-02",
                "data": {"close": 101.5, "symbol": "ACME", "volume": 1010},
            }),
        ];
        let records: Vec<_> = lines.iter().map(|l| flatten(l).unwrap()).collect();
        let (bytes, _) = engine::encode_records(
            DEFAULT_LINKING_COLUMN,
            records,
            &EncodeOptions::default(),
        )
        .unwrap();
        let decoded = engine::decode_pairs(&bytes, &DecodeOptions::default()).unwrap();
        let rebuilt: Vec<_> = decoded.iter().map(|p| unflatten(p)).collect();
        assert_eq!(rebuilt, lines.to_vec());
    }

    #[test]
    fn generated_prices_are_rounded() {
        assert_eq!(round2(101.24999), 101.25);
        assert_eq!(round2(55.0), 55.0);
    }

    #[test]
    fn generated_volume_arrays_have_no_trailing_zeros() {
        assert_eq!(minimal_le_bytes(1000), vec![232, 3]);
        assert_eq!(minimal_le_bytes(0x186A0), vec![0xA0, 0x86, 0x01]);
        assert_eq!(minimal_le_bytes(0), vec![0]);
    }
}
