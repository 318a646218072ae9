use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::{Value, json};

const BLOCK_MAGIC: u32 = 0xFEED_A1E5;

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_hg-ledger"))
        .args(args)
        .output()
        .expect("failed to run hg-ledger CLI")
}

fn frame_blocks(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in payload.chunks(128) {
        let compressed = lz4_flex::block::compress(chunk);
        out.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&compressed);
    }
    out
}

fn save_doc(timestamp: i64, first_amount: i64) -> Value {
    let slots: Vec<Value> = (0..6)
        .map(|i| {
            json!({
                "b2n": format!("^RES{i}"),
                "1o9": if i == 0 { first_amount } else { 10 },
                "F9q": 250,
                "Vn8": {"elv": "Product"}
            })
        })
        .collect();
    json!({
        "Timestamp": timestamp,
        ";l5": {"inv": {"hl?": slots}}
    })
}

fn write_container(dir: &Path, name: &str, doc: &Value) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, frame_blocks(doc.to_string().as_bytes())).unwrap();
    path
}

#[test]
fn decode_writes_clean_json() {
    let dir = tempfile::tempdir().unwrap();
    let doc = save_doc(1758378780, 50);
    let container = write_container(dir.path(), "save.hg", &doc);
    let out = dir.path().join("save.json");

    let output = run_cli(&[
        "decode",
        container.to_str().unwrap(),
        "--output",
        out.to_str().unwrap(),
        "--debug",
    ]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("method=block-stream"));

    let round: Value = serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
    assert_eq!(round, doc);
}

#[test]
fn decode_rejects_garbage_with_err_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.hg");
    fs::write(&path, b"\x01\x02\x03 nothing here").unwrap();

    let output = run_cli(&["decode", path.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[ERR]"));
}

#[test]
fn fingerprint_matches_between_raw_and_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let doc = save_doc(1758378780, 50);
    let container = write_container(dir.path(), "save.hg", &doc);
    let decoded = dir.path().join("save.json");
    fs::write(&decoded, doc.to_string()).unwrap();

    let from_raw = run_cli(&["fingerprint", container.to_str().unwrap()]);
    let from_json = run_cli(&["fingerprint", decoded.to_str().unwrap()]);
    assert!(from_raw.status.success());
    assert!(from_json.status.success());

    let raw_hex = String::from_utf8_lossy(&from_raw.stdout).trim().to_string();
    let json_hex = String::from_utf8_lossy(&from_json.stdout).trim().to_string();
    assert_eq!(raw_hex, json_hex);
    assert_eq!(raw_hex.len(), 64);
    assert!(raw_hex.bytes().all(|b| b.is_ascii_hexdigit()));
}

#[test]
fn snapshot_reports_totals_and_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let decoded = dir.path().join("save.json");
    fs::write(&decoded, save_doc(1758378780, 50).to_string()).unwrap();

    let output = run_cli(&["snapshot", decoded.to_str().unwrap()]);
    assert!(output.status.success());
    let snap: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(snap["totals"].as_array().unwrap().len(), 6);
    assert_eq!(snap["totals"][0]["owner"], "SUIT");
    assert!(snap["fingerprint"].as_str().unwrap().len() == 64);
}

#[test]
fn extract_lines_emits_one_record_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let decoded = dir.path().join("save.json");
    fs::write(&decoded, save_doc(1758378780, 50).to_string()).unwrap();

    let output = run_cli(&["extract", decoded.to_str().unwrap(), "--lines"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 6);
    for line in lines {
        let rec: Value = serde_json::from_str(line).unwrap();
        assert!(rec["resource_id"].as_str().unwrap().starts_with("RES"));
    }
}

#[test]
fn ledger_builds_session_deltas_and_sql() {
    let dir = tempfile::tempdir().unwrap();
    let saves = dir.path().join("decoded");
    fs::create_dir(&saves).unwrap();
    fs::write(
        saves.join("a.json"),
        save_doc(1758378780, 50).to_string(),
    )
    .unwrap();
    fs::write(
        saves.join("b.json"),
        save_doc(1758378780 + 300, 200).to_string(),
    )
    .unwrap();
    let sql_path = dir.path().join("deltas.sql");

    let output = run_cli(&[
        "ledger",
        saves.to_str().unwrap(),
        "--sql-out",
        sql_path.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["files"], 2);
    assert_eq!(report["skipped"], 0);
    assert_eq!(report["sessions"], 1);
    assert_eq!(report["deltas"][0]["net"], 150);
    assert_eq!(report["lifetime_totals"][0]["resource_id"], "RES0");
    assert_eq!(report["lifetime_totals"][0]["acquired"], 150);

    let sql = fs::read_to_string(&sql_path).unwrap();
    assert!(sql.contains("CREATE TABLE IF NOT EXISTS ledger_delta"));
    assert!(sql.contains("ON DUPLICATE KEY UPDATE"));
}

#[test]
fn ledger_accepts_manifest_inputs_and_uses_their_mtime() {
    let dir = tempfile::tempdir().unwrap();
    // Documents with no usable in-document timestamp.
    let mut doc_a = save_doc(0, 50);
    doc_a.as_object_mut().unwrap().remove("Timestamp");
    let mut doc_b = save_doc(0, 200);
    doc_b.as_object_mut().unwrap().remove("Timestamp");
    let a_json = dir.path().join("a.json");
    let b_json = dir.path().join("b.json");
    fs::write(&a_json, doc_a.to_string()).unwrap();
    fs::write(&b_json, doc_b.to_string()).unwrap();

    let write_manifest = |name: &str, out: &Path, mtime: &str| {
        let path = dir.path().join(name);
        let manifest = json!({
            "generated_at": "2025-09-20T14:00:00Z",
            "source_path": "saves/save.hg",
            "source_mtime": mtime,
            "out_json": out.to_str().unwrap(),
            "content_hash": "0000",
        });
        fs::write(&path, manifest.to_string()).unwrap();
        path
    };
    let m_a = write_manifest("m_a.json", &a_json, "2025-09-20T10:00:00Z");
    let m_b = write_manifest("m_b.json", &b_json, "2025-09-20T12:00:00Z");

    let output = run_cli(&["ledger", m_a.to_str().unwrap(), m_b.to_str().unwrap()]);
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["files"], 2);
    // The JSON files themselves were written seconds apart; two sessions
    // prove the manifest mtimes, two hours apart, drove the timestamps.
    assert_eq!(report["sessions"], 2);
}

#[test]
fn ledger_skips_broken_files_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let saves = dir.path().join("decoded");
    fs::create_dir(&saves).unwrap();
    fs::write(saves.join("a.json"), save_doc(1758378780, 50).to_string()).unwrap();
    fs::write(saves.join("broken.json"), b"{ truncated").unwrap();

    let output = run_cli(&["ledger", saves.to_str().unwrap()]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[WARN]"));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["files"], 1);
    assert_eq!(report["skipped"], 1);
}

#[test]
fn init_sql_emits_schema_and_upserts() {
    let dir = tempfile::tempdir().unwrap();
    let decoded = dir.path().join("save.json");
    fs::write(&decoded, save_doc(1758378780, 50).to_string()).unwrap();

    let output = run_cli(&[
        "init-sql",
        decoded.to_str().unwrap(),
        "--source",
        "slot1",
    ]);
    assert!(output.status.success());
    let sql = String::from_utf8_lossy(&output.stdout);
    assert!(sql.contains("CREATE TABLE IF NOT EXISTS slot_item"));
    assert!(sql.starts_with("CREATE TABLE"));
    assert!(sql.contains("'slot1'"));
    assert!(sql.contains("ON DUPLICATE KEY UPDATE amount = VALUES(amount)"));
}

#[test]
fn manifest_records_source_and_hash() {
    let dir = tempfile::tempdir().unwrap();
    let doc = save_doc(1758378780, 50);
    let container = write_container(dir.path(), "save.hg", &doc);
    let out_json = dir.path().join("save.json");
    fs::write(&out_json, doc.to_string()).unwrap();

    let output = run_cli(&[
        "manifest",
        container.to_str().unwrap(),
        out_json.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let manifest_path = dir.path().join("_manifest_recent.json");
    assert!(manifest_path.exists());
    let manifest: Value = serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
    assert!(manifest["source_path"].as_str().unwrap().ends_with("save.hg"));
    assert_eq!(manifest["content_hash"].as_str().unwrap().len(), 64);
}
