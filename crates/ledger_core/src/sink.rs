//! SQL emission for the external relational sink (MariaDB dialect).
//!
//! This module only produces text; no database client is linked. Statements
//! are idempotent upserts so re-running an import cannot duplicate rows.

use chrono::{DateTime, Utc};

use crate::extract::SlotRecord;
use crate::ledger::{LedgerDelta, Snapshot};

/// Table definitions, safe to re-run.
pub const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS snapshot (
  taken_at DATETIME NOT NULL,
  source VARCHAR(512) NOT NULL,
  fingerprint CHAR(64) NOT NULL,
  PRIMARY KEY (taken_at, source)
);
CREATE TABLE IF NOT EXISTS slot_item (
  taken_at DATETIME NOT NULL,
  owner VARCHAR(16) NOT NULL,
  inventory VARCHAR(8) NOT NULL,
  container VARCHAR(64) NOT NULL,
  slot_index INT NOT NULL,
  resource VARCHAR(64) NOT NULL,
  amount BIGINT UNSIGNED NOT NULL,
  PRIMARY KEY (taken_at, owner, inventory, container, slot_index, resource)
);
CREATE TABLE IF NOT EXISTS ledger_delta (
  from_at DATETIME NOT NULL,
  to_at DATETIME NOT NULL,
  owner VARCHAR(16) NOT NULL,
  inventory VARCHAR(8) NOT NULL,
  resource VARCHAR(64) NOT NULL,
  acquired BIGINT UNSIGNED NOT NULL,
  spent BIGINT UNSIGNED NOT NULL,
  net BIGINT NOT NULL,
  PRIMARY KEY (from_at, to_at, owner, inventory, resource)
);
";

/// Escape a string literal: doubled quotes plus backslash escaping, which
/// MariaDB requires in its default SQL mode.
pub fn sql_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("''"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

fn sql_datetime(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Upsert one snapshot and its slot rows, wrapped in a transaction.
pub fn snapshot_sql(snapshot: &Snapshot, records: &[SlotRecord], source: &str) -> String {
    let taken = sql_datetime(snapshot.taken_at);
    let mut out = String::new();
    out.push_str("BEGIN;\n");
    out.push_str(&format!(
        "INSERT INTO snapshot (taken_at, source, fingerprint) VALUES ('{}', '{}', '{}')\n  \
         ON DUPLICATE KEY UPDATE fingerprint = VALUES(fingerprint);\n",
        taken,
        sql_escape(source),
        sql_escape(&snapshot.fingerprint),
    ));
    for rec in records {
        out.push_str(&format!(
            "INSERT INTO slot_item (taken_at, owner, inventory, container, slot_index, resource, amount)\n  \
             VALUES ('{}', '{}', '{}', '{}', {}, '{}', {})\n  \
             ON DUPLICATE KEY UPDATE amount = VALUES(amount);\n",
            taken,
            rec.owner.as_str(),
            rec.kind.as_str(),
            sql_escape(&rec.container_id),
            rec.slot_index,
            sql_escape(&rec.resource_id),
            rec.amount,
        ));
    }
    out.push_str("COMMIT;\n");
    out
}

/// Upsert the rows of one ledger delta, wrapped in a transaction.
pub fn delta_sql(delta: &LedgerDelta) -> String {
    let from = sql_datetime(delta.from);
    let to = sql_datetime(delta.to);
    let mut out = String::new();
    out.push_str("BEGIN;\n");
    for row in &delta.rows {
        let (acquired, spent) = if row.net > 0 {
            (row.net as u64, 0)
        } else {
            (0, (-row.net) as u64)
        };
        out.push_str(&format!(
            "INSERT INTO ledger_delta (from_at, to_at, owner, inventory, resource, acquired, spent, net)\n  \
             VALUES ('{}', '{}', '{}', '{}', '{}', {}, {}, {})\n  \
             ON DUPLICATE KEY UPDATE acquired = VALUES(acquired), spent = VALUES(spent), net = VALUES(net);\n",
            from,
            to,
            row.owner.as_str(),
            row.kind.as_str(),
            sql_escape(&row.resource_id),
            acquired,
            spent,
            row.net,
        ));
    }
    out.push_str("COMMIT;\n");
    out
}
