use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use ledger_core::decode::{Decoded, decode_file, decode_to_document};
use ledger_core::extract::{AmountStrategy, ExtractOptions, SlotRecord, extract};
use ledger_core::format::SlotBounds;
use ledger_core::indexer::{IndexerConfig, SectionOverrides, index_with, summarize};
use ledger_core::ledger::{
    Snapshot, aggregate, coalesce, lifetime_totals, resolve_timestamp, session_deltas,
};
use ledger_core::manifest::{MANIFEST_FILE_NAME, Manifest};
use ledger_core::sink;
use serde_json::{Value, json};

#[derive(Debug, Parser)]
#[command(version, about = "Decode obfuscated save containers and track inventory ledgers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a raw save container to clean UTF-8 JSON.
    Decode {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        pretty: bool,
        /// Print the winning decode method and block stats to stderr.
        #[arg(long)]
        debug: bool,
    },
    /// Locate inventory structure in a decoded document.
    Index {
        input: PathBuf,
        /// Use the wide slot-count bounds (10..=250).
        #[arg(long)]
        wide_bounds: bool,
        /// JSON file mapping section names to explicit paths.
        #[arg(long, value_name = "FILE")]
        overrides: Option<PathBuf>,
    },
    /// Extract normalized slot records from a decoded document.
    Extract {
        input: PathBuf,
        #[arg(long)]
        include_tech: bool,
        #[arg(long, default_value = "prefer-explicit",
              value_parser = parse_strategy,
              value_name = "prefer-explicit|min-positive|max-positive")]
        amount_strategy: AmountStrategy,
        /// One JSON object per line instead of a single array.
        #[arg(long)]
        lines: bool,
    },
    /// Aggregate a decoded document into totals plus a fingerprint.
    Snapshot {
        input: PathBuf,
        /// Prefer the file mtime over in-document timestamps.
        #[arg(long)]
        use_mtime: bool,
        #[arg(long)]
        include_tech: bool,
    },
    /// Print the content fingerprint of a save (raw or decoded).
    Fingerprint { input: PathBuf },
    /// Build session deltas and lifetime totals from decoded saves.
    Ledger {
        /// Decoded JSON files, decode manifests, or directories of them.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value_t = ledger_core::ledger::DEFAULT_SESSION_GAP_MINUTES)]
        session_minutes: i64,
        #[arg(long)]
        use_mtime: bool,
        #[arg(long)]
        include_tech: bool,
        /// Also write delta upsert SQL to this file.
        #[arg(long, value_name = "FILE")]
        sql_out: Option<PathBuf>,
    },
    /// Emit schema plus initial snapshot upsert SQL for one decoded save.
    InitSql {
        input: PathBuf,
        /// Source label recorded in the snapshot row; defaults to the path.
        #[arg(long)]
        source: Option<String>,
    },
    /// Write the recent-decode manifest for a decode output.
    Manifest {
        /// The raw container that was decoded.
        input: PathBuf,
        /// The decode output the manifest points at.
        out_json: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_strategy(s: &str) -> Result<AmountStrategy, String> {
    AmountStrategy::parse(s).ok_or_else(|| format!("unknown amount strategy {s:?}"))
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Decode {
            input,
            output,
            pretty,
            debug,
        } => cmd_decode(&input, output.as_deref(), pretty, debug),
        Command::Index {
            input,
            wide_bounds,
            overrides,
        } => cmd_index(&input, wide_bounds, overrides.as_deref()),
        Command::Extract {
            input,
            include_tech,
            amount_strategy,
            lines,
        } => cmd_extract(&input, include_tech, amount_strategy, lines),
        Command::Snapshot {
            input,
            use_mtime,
            include_tech,
        } => {
            let snap = build_snapshot(&input, use_mtime, include_tech);
            print_json(&json!(snap), true);
        }
        Command::Fingerprint { input } => {
            let snap = build_snapshot(&input, false, false);
            println!("{}", snap.fingerprint);
        }
        Command::Ledger {
            inputs,
            session_minutes,
            use_mtime,
            include_tech,
            sql_out,
        } => cmd_ledger(&inputs, session_minutes, use_mtime, include_tech, sql_out.as_deref()),
        Command::InitSql { input, source } => cmd_init_sql(&input, source),
        Command::Manifest {
            input,
            out_json,
            output,
        } => cmd_manifest(&input, &out_json, output.as_deref()),
    }
}

fn read_raw(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| {
        eprintln!("[ERR] reading {}: {e}", path.display());
        process::exit(1);
    })
}

fn decode_raw(path: &Path) -> Decoded {
    decode_file(path).unwrap_or_else(|e| {
        eprintln!("[ERR] decoding {}: {e}", path.display());
        process::exit(1);
    })
}

/// Load a document for the post-decode commands. Already-decoded JSON is
/// the expected input, but a raw container is accepted and decoded in
/// place.
fn load_document(path: &Path) -> Result<Value, String> {
    let raw = fs::read(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    if let Ok(doc) = serde_json::from_slice(&raw) {
        return Ok(doc);
    }
    decode_to_document(&raw)
        .map(|d| d.doc)
        .map_err(|e| format!("decoding {}: {e}", path.display()))
}

fn load_document_or_exit(path: &Path) -> Value {
    load_document(path).unwrap_or_else(|e| {
        eprintln!("[ERR] {e}");
        process::exit(1);
    })
}

fn print_json(value: &Value, pretty: bool) {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match text {
        Ok(t) => println!("{t}"),
        Err(e) => {
            eprintln!("[ERR] serializing output: {e}");
            process::exit(1);
        }
    }
}

fn cmd_decode(input: &Path, output: Option<&Path>, pretty: bool, debug: bool) {
    let decoded = decode_raw(input);
    if debug {
        eprintln!("[OK] {}: method={}", input.display(), decoded.method.label());
        if let ledger_core::decode::DecodeMethod::BlockStream { blocks } = decoded.method {
            eprintln!("[OK] stitched {blocks} blocks");
        }
    }
    let text = if pretty {
        serde_json::to_string_pretty(&decoded.doc)
    } else {
        serde_json::to_string(&decoded.doc)
    }
    .unwrap_or_else(|e| {
        eprintln!("[ERR] serializing document: {e}");
        process::exit(1);
    });
    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, text + "\n") {
                eprintln!("[ERR] writing {}: {e}", path.display());
                process::exit(1);
            }
        }
        None => println!("{text}"),
    }
}

fn cmd_index(input: &Path, wide_bounds: bool, overrides: Option<&Path>) {
    let doc = load_document_or_exit(input);
    let mut config = IndexerConfig::default();
    if wide_bounds {
        config.bounds = SlotBounds::WIDE;
    }
    if let Some(path) = overrides {
        let raw = read_raw(path);
        config.overrides = serde_json::from_slice::<SectionOverrides>(&raw).unwrap_or_else(|e| {
            eprintln!("[ERR] parsing overrides {}: {e}", path.display());
            process::exit(1);
        });
    }
    let found = index_with(&doc, &config);
    let summary = summarize(&doc, &found);
    print_json(&json!({"index": found, "summary": summary}), true);
}

fn cmd_extract(input: &Path, include_tech: bool, strategy: AmountStrategy, lines: bool) {
    let doc = load_document_or_exit(input);
    let found = index_with(&doc, &IndexerConfig::default());
    let options = ExtractOptions {
        strategy,
        include_tech,
    };
    if lines {
        for rec in extract(&doc, &found, options) {
            print_json(&json!(rec), false);
        }
    } else {
        let records: Vec<SlotRecord> = extract(&doc, &found, options).collect();
        print_json(&json!(records), true);
    }
}

fn snapshot_timestamp(path: &Path, doc: &Value, use_mtime: bool) -> Option<DateTime<Utc>> {
    let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
    let name = path.file_name().and_then(|n| n.to_str());
    if use_mtime && let Some(m) = mtime {
        return Some(DateTime::<Utc>::from(m));
    }
    resolve_timestamp(Some(doc), mtime, name)
}

fn build_snapshot(input: &Path, use_mtime: bool, include_tech: bool) -> Snapshot {
    let doc = load_document_or_exit(input);
    let found = index_with(&doc, &IndexerConfig::default());
    let options = ExtractOptions {
        include_tech,
        ..ExtractOptions::default()
    };
    let when = snapshot_timestamp(input, &doc, use_mtime).unwrap_or_else(Utc::now);
    aggregate(extract(&doc, &found, options), when)
}

fn collect_ledger_files(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = match fs::read_dir(input) {
                Ok(rd) => rd
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        p.extension().is_some_and(|ext| ext == "json")
                            && p.file_name().is_some_and(|n| n != MANIFEST_FILE_NAME)
                    })
                    .collect(),
                Err(e) => {
                    eprintln!("[WARN] reading directory {}: {e}", input.display());
                    continue;
                }
            };
            entries.sort();
            files.extend(entries);
        } else {
            files.push(input.clone());
        }
    }
    files
}

fn cmd_ledger(
    inputs: &[PathBuf],
    session_minutes: i64,
    use_mtime: bool,
    include_tech: bool,
    sql_out: Option<&Path>,
) {
    let files = collect_ledger_files(inputs);
    let options = ExtractOptions {
        include_tech,
        ..ExtractOptions::default()
    };

    let mut snapshots = Vec::new();
    let mut skipped = 0usize;
    for path in &files {
        // A manifest input stands in for the decode output it points at
        // and carries the save's original mtime.
        let (doc_path, manifest_mtime) = match Manifest::read_from(path) {
            Ok(m) => (PathBuf::from(m.out_json), m.source_mtime),
            Err(_) => (path.clone(), None),
        };
        let doc = match load_document(&doc_path) {
            Ok(doc) => doc,
            Err(e) => {
                eprintln!("[WARN] {e}");
                skipped += 1;
                continue;
            }
        };
        let mtime = manifest_mtime
            .map(SystemTime::from)
            .or_else(|| fs::metadata(&doc_path).and_then(|m| m.modified()).ok());
        let name = doc_path.file_name().and_then(|n| n.to_str());
        let when = if use_mtime && let Some(m) = mtime {
            Some(DateTime::<Utc>::from(m))
        } else {
            resolve_timestamp(Some(&doc), mtime, name)
        };
        let Some(when) = when else {
            eprintln!("[WARN] {}: no usable timestamp", doc_path.display());
            skipped += 1;
            continue;
        };
        let found = index_with(&doc, &IndexerConfig::default());
        snapshots.push(aggregate(extract(&doc, &found, options), when));
    }
    if skipped > 0 {
        eprintln!("[WARN] skipped {skipped} of {} files", files.len());
    }
    if snapshots.is_empty() {
        eprintln!("[ERR] no usable snapshots");
        process::exit(1);
    }

    let sessions = coalesce(snapshots, Duration::minutes(session_minutes));
    let deltas = session_deltas(&sessions);
    let lifetime = lifetime_totals(&deltas);

    if let Some(path) = sql_out {
        let mut sql = String::from(sink::SCHEMA_SQL);
        for delta in &deltas {
            sql.push_str(&sink::delta_sql(delta));
        }
        if let Err(e) = fs::write(path, sql) {
            eprintln!("[ERR] writing {}: {e}", path.display());
            process::exit(1);
        }
    }

    print_json(
        &json!({
            "files": files.len() - skipped,
            "skipped": skipped,
            "sessions": sessions.len(),
            "deltas": deltas,
            "lifetime_totals": lifetime,
        }),
        true,
    );
}

fn cmd_init_sql(input: &Path, source: Option<String>) {
    let doc = load_document_or_exit(input);
    let found = index_with(&doc, &IndexerConfig::default());
    let records: Vec<SlotRecord> =
        extract(&doc, &found, ExtractOptions::default()).collect();
    let when = snapshot_timestamp(input, &doc, false).unwrap_or_else(Utc::now);
    let snap = aggregate(records.iter().cloned(), when);
    let source = source.unwrap_or_else(|| input.display().to_string());
    print!("{}", sink::SCHEMA_SQL);
    print!("{}", sink::snapshot_sql(&snap, &records, &source));
}

fn cmd_manifest(input: &Path, out_json: &Path, output: Option<&Path>) {
    let decoded = decode_raw(input);
    let found = index_with(&decoded.doc, &IndexerConfig::default());
    let snap = aggregate(
        extract(&decoded.doc, &found, ExtractOptions::default()),
        Utc::now(),
    );
    let mtime = fs::metadata(input)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    let manifest = Manifest {
        generated_at: Utc::now(),
        source_path: input.display().to_string(),
        source_mtime: mtime,
        out_json: out_json.display().to_string(),
        content_hash: snap.fingerprint,
    };
    let path = match output {
        Some(p) => p.to_path_buf(),
        None => out_json
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(MANIFEST_FILE_NAME),
    };
    if let Err(e) = manifest.write_to(&path) {
        eprintln!("[ERR] writing {}: {e}", path.display());
        process::exit(1);
    }
    println!("{}", path.display());
}
