//! Aggregation of slot records into snapshots, deltas between snapshots,
//! session coalescing and lifetime totals.

use std::collections::BTreeMap;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::{InventoryKind, OwnerType, SlotRecord};

/// Gap between saves that still counts as one play session.
pub const DEFAULT_SESSION_GAP_MINUTES: i64 = 10;

/// One aggregated quantity line inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalRow {
    pub owner: OwnerType,
    pub kind: InventoryKind,
    pub resource_id: String,
    pub total: u64,
}

/// Aggregated inventory state at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    /// Sorted by (owner, kind, resource).
    pub totals: Vec<TotalRow>,
    /// Content fingerprint over owner-level totals. Stable under record
    /// reordering and slot duplication, so two decodes of the same save
    /// always agree.
    pub fingerprint: String,
}

/// Aggregate slot records into a snapshot.
///
/// The same physical slot can surface through more than one indexed path
/// (override plus heuristic, or nested duplicates in corrupt saves), so
/// records are first deduplicated on their full slot key with max-wins
/// before summing. Aggregating twice over the same input is idempotent.
pub fn aggregate(
    records: impl IntoIterator<Item = SlotRecord>,
    taken_at: DateTime<Utc>,
) -> Snapshot {
    let mut slots: BTreeMap<(OwnerType, InventoryKind, String, i64, String), u64> =
        BTreeMap::new();
    for rec in records {
        let key = (
            rec.owner,
            rec.kind,
            rec.container_id,
            rec.slot_index,
            rec.resource_id,
        );
        let entry = slots.entry(key).or_insert(0);
        *entry = (*entry).max(rec.amount);
    }

    let mut sums: BTreeMap<(OwnerType, InventoryKind, String), u64> = BTreeMap::new();
    for ((owner, kind, _, _, resource_id), amount) in slots {
        *sums.entry((owner, kind, resource_id)).or_insert(0) += amount;
    }

    let totals: Vec<TotalRow> = sums
        .into_iter()
        .map(|((owner, kind, resource_id), total)| TotalRow {
            owner,
            kind,
            resource_id,
            total,
        })
        .collect();
    let fingerprint = fingerprint_totals(&totals);
    Snapshot {
        taken_at,
        totals,
        fingerprint,
    }
}

/// Fingerprint over owner-level sums: sorted `OWNER|resource|total` rows
/// joined with `;`, hashed. Kind is folded away so that a tech/cargo
/// re-index of the same save keeps the same fingerprint.
pub fn fingerprint_totals(totals: &[TotalRow]) -> String {
    let mut by_owner: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for row in totals {
        *by_owner
            .entry((row.owner.as_str(), row.resource_id.as_str()))
            .or_insert(0) += row.total;
    }
    let rows: Vec<String> = by_owner
        .into_iter()
        .map(|((owner, resource), total)| format!("{owner}|{resource}|{total}"))
        .collect();
    blake3::hash(rows.join(";").as_bytes()).to_hex().to_string()
}

/// One changed quantity between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRow {
    pub owner: OwnerType,
    pub kind: InventoryKind,
    pub resource_id: String,
    pub before: u64,
    pub after: u64,
    pub net: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDelta {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Changed rows only; untouched resources are omitted.
    pub rows: Vec<DeltaRow>,
    pub acquired: u64,
    pub spent: u64,
    pub net: i64,
}

/// Difference between two snapshots over the union of their keys.
pub fn diff(a: &Snapshot, b: &Snapshot) -> LedgerDelta {
    let index = |s: &Snapshot| -> BTreeMap<(OwnerType, InventoryKind, String), u64> {
        s.totals
            .iter()
            .map(|r| ((r.owner, r.kind, r.resource_id.clone()), r.total))
            .collect()
    };
    let before = index(a);
    let after = index(b);

    let mut keys: Vec<&(OwnerType, InventoryKind, String)> = before.keys().collect();
    for k in after.keys() {
        if !before.contains_key(k) {
            keys.push(k);
        }
    }
    keys.sort();

    let mut rows = Vec::new();
    let mut acquired = 0u64;
    let mut spent = 0u64;
    for key in keys {
        let b0 = before.get(key).copied().unwrap_or(0);
        let a1 = after.get(key).copied().unwrap_or(0);
        if b0 == a1 {
            continue;
        }
        let net = a1 as i64 - b0 as i64;
        if net > 0 {
            acquired += net as u64;
        } else {
            spent += (-net) as u64;
        }
        rows.push(DeltaRow {
            owner: key.0,
            kind: key.1,
            resource_id: key.2.clone(),
            before: b0,
            after: a1,
            net,
        });
    }
    LedgerDelta {
        from: a.taken_at,
        to: b.taken_at,
        rows,
        acquired,
        spent,
        net: acquired as i64 - spent as i64,
    }
}

/// A run of snapshots with no gap larger than the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub snapshots: Vec<Snapshot>,
}

/// Group snapshots into sessions by timestamp gap. Input order does not
/// matter; snapshots are sorted first.
pub fn coalesce(mut snapshots: Vec<Snapshot>, max_gap: chrono::Duration) -> Vec<Session> {
    snapshots.sort_by_key(|s| s.taken_at);
    let mut sessions: Vec<Session> = Vec::new();
    for snap in snapshots {
        match sessions.last_mut() {
            Some(session) if snap.taken_at - session.end <= max_gap => {
                session.end = snap.taken_at;
                session.snapshots.push(snap);
            }
            _ => sessions.push(Session {
                start: snap.taken_at,
                end: snap.taken_at,
                snapshots: vec![snap],
            }),
        }
    }
    sessions
}

/// Per-session delta: first snapshot against last. Single-snapshot
/// sessions produce an empty delta spanning one instant.
pub fn session_deltas(sessions: &[Session]) -> Vec<LedgerDelta> {
    sessions
        .iter()
        .filter_map(|s| {
            let first = s.snapshots.first()?;
            let last = s.snapshots.last()?;
            Some(diff(first, last))
        })
        .collect()
}

/// Lifetime movement of one resource across all sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifetimeTotal {
    pub resource_id: String,
    pub acquired: u64,
    pub spent: u64,
    pub net: i64,
}

pub fn lifetime_totals(deltas: &[LedgerDelta]) -> Vec<LifetimeTotal> {
    let mut by_resource: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for delta in deltas {
        for row in &delta.rows {
            let entry = by_resource.entry(row.resource_id.clone()).or_insert((0, 0));
            if row.net > 0 {
                entry.0 += row.net as u64;
            } else {
                entry.1 += (-row.net) as u64;
            }
        }
    }
    by_resource
        .into_iter()
        .map(|(resource_id, (acquired, spent))| LifetimeTotal {
            resource_id,
            acquired,
            spent,
            net: acquired as i64 - spent as i64,
        })
        .collect()
}

/// Resolve the moment a save was taken: in-document fields, then the file
/// mtime, then a date fragment in the file name.
pub fn resolve_timestamp(
    doc: Option<&Value>,
    mtime: Option<SystemTime>,
    file_name: Option<&str>,
) -> Option<DateTime<Utc>> {
    if let Some(doc) = doc
        && let Some(ts) = document_timestamp(doc)
    {
        return Some(ts);
    }
    if let Some(m) = mtime {
        return Some(DateTime::<Utc>::from(m));
    }
    file_name.and_then(filename_timestamp)
}

/// Timestamps the save writer has been seen to emit: top-level fields, or
/// time-named fields one level under the metadata object.
fn document_timestamp(doc: &Value) -> Option<DateTime<Utc>> {
    const FIELDS: &[&str] = &["Timestamp", "SaveTime", "TimeStamp"];
    let obj = doc.as_object()?;
    for field in FIELDS {
        if let Some(ts) = obj.get(*field).and_then(timestamp_value) {
            return Some(ts);
        }
    }
    if let Some(Value::Object(meta)) = obj.get("MetaData") {
        for (key, value) in meta {
            if key.to_ascii_lowercase().contains("time")
                && let Some(ts) = timestamp_value(value)
            {
                return Some(ts);
            }
        }
    }
    None
}

fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(unix_seconds),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// Seconds since the epoch, bounded to a plausible save-file range.
fn unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    if !(1_000_000_000..20_000_000_000).contains(&secs) {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d_%H-%M-%S", "%Y%m%d%H%M%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if s.len() == 10 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(unix_seconds);
    }
    None
}

/// Find a `YYYY-MM-DD_HH-MM-SS` style fragment anywhere in a file name.
fn filename_timestamp(name: &str) -> Option<DateTime<Utc>> {
    if !name.is_ascii() {
        return None;
    }
    for width in [19usize, 14] {
        if name.len() < width {
            continue;
        }
        for start in 0..=name.len() - width {
            let window = &name[start..start + width];
            for fmt in ["%Y-%m-%d_%H-%M-%S", "%Y-%m-%d %H:%M:%S", "%Y%m%d%H%M%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(window, fmt) {
                    return Some(naive.and_utc());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn rec(owner: OwnerType, resource: &str, container: &str, slot: i64, amount: u64) -> SlotRecord {
        SlotRecord {
            resource_id: resource.to_string(),
            amount,
            owner,
            kind: InventoryKind::General,
            container_id: container.to_string(),
            slot_index: slot,
            item_type: crate::extract::ItemType::Substance,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        parse_timestamp_str(s).unwrap()
    }

    #[test]
    fn duplicate_slots_do_not_double_count() {
        let records = vec![
            rec(OwnerType::Suit, "CARBON", "CONT0", 0, 250),
            rec(OwnerType::Suit, "CARBON", "CONT0", 0, 100),
            rec(OwnerType::Suit, "CARBON", "CONT0", 1, 50),
        ];
        let snap = aggregate(records, at("2025-09-20 14:00:00"));
        assert_eq!(snap.totals.len(), 1);
        // Slot 0 dedups max-wins to 250, slot 1 adds 50.
        assert_eq!(snap.totals[0].total, 300);
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = aggregate(
            vec![
                rec(OwnerType::Suit, "CARBON", "CONT0", 0, 10),
                rec(OwnerType::Ship, "GOLD", "CONT1", 0, 5),
            ],
            at("2025-09-20 14:00:00"),
        );
        let b = aggregate(
            vec![
                rec(OwnerType::Ship, "GOLD", "CONT1", 0, 5),
                rec(OwnerType::Suit, "CARBON", "CONT0", 0, 10),
            ],
            at("2025-09-21 09:00:00"),
        );
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn diff_covers_key_union_and_omits_zero() {
        let a = aggregate(
            vec![
                rec(OwnerType::Suit, "CARBON", "CONT0", 0, 100),
                rec(OwnerType::Suit, "GOLD", "CONT0", 1, 7),
                rec(OwnerType::Suit, "SILVER", "CONT0", 2, 42),
            ],
            at("2025-09-20 14:00:00"),
        );
        let b = aggregate(
            vec![
                rec(OwnerType::Suit, "CARBON", "CONT0", 0, 160),
                rec(OwnerType::Suit, "SILVER", "CONT0", 2, 42),
                rec(OwnerType::Suit, "COBALT", "CONT0", 3, 20),
            ],
            at("2025-09-20 14:30:00"),
        );
        let delta = diff(&a, &b);
        let ids: Vec<&str> = delta.rows.iter().map(|r| r.resource_id.as_str()).collect();
        // SILVER is unchanged and omitted; GOLD drains to zero; COBALT is new.
        assert_eq!(ids, vec!["CARBON", "COBALT", "GOLD"]);
        assert_eq!(delta.acquired, 60 + 20);
        assert_eq!(delta.spent, 7);
        assert_eq!(delta.net, 73);
    }

    #[test]
    fn coalesce_splits_on_gap() {
        let snaps = vec![
            aggregate(vec![], at("2025-09-20 14:00:00")),
            aggregate(vec![], at("2025-09-20 14:08:00")),
            aggregate(vec![], at("2025-09-20 14:30:00")),
            aggregate(vec![], at("2025-09-20 14:39:00")),
        ];
        let sessions = coalesce(snaps, Duration::minutes(DEFAULT_SESSION_GAP_MINUTES));
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].snapshots.len(), 2);
        assert_eq!(sessions[1].start, at("2025-09-20 14:30:00"));
        assert_eq!(sessions[1].end, at("2025-09-20 14:39:00"));
    }

    #[test]
    fn session_deltas_diff_boundary_snapshots() {
        let s1 = aggregate(
            vec![rec(OwnerType::Suit, "CARBON", "CONT0", 0, 10)],
            at("2025-09-20 14:00:00"),
        );
        let s2 = aggregate(
            vec![rec(OwnerType::Suit, "CARBON", "CONT0", 0, 90)],
            at("2025-09-20 14:05:00"),
        );
        let sessions = coalesce(vec![s1, s2], Duration::minutes(10));
        let deltas = session_deltas(&sessions);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].net, 80);
    }

    #[test]
    fn lifetime_totals_accumulate_across_deltas() {
        let mk = |amount: u64, when: &str| {
            aggregate(vec![rec(OwnerType::Suit, "CARBON", "CONT0", 0, amount)], at(when))
        };
        let deltas = vec![
            diff(&mk(10, "2025-09-20 14:00:00"), &mk(60, "2025-09-20 14:05:00")),
            diff(&mk(60, "2025-09-20 15:00:00"), &mk(40, "2025-09-20 15:05:00")),
        ];
        let totals = lifetime_totals(&deltas);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].acquired, 50);
        assert_eq!(totals[0].spent, 20);
        assert_eq!(totals[0].net, 30);
    }

    #[test]
    fn timestamp_ladder_prefers_document_fields() {
        let doc = json!({"Timestamp": 1758376380});
        let ts = resolve_timestamp(Some(&doc), None, Some("2020-01-01_00-00-00.json")).unwrap();
        assert_eq!(ts, Utc.timestamp_opt(1758376380, 0).single().unwrap());
    }

    #[test]
    fn timestamp_from_metadata_string() {
        let doc = json!({"MetaData": {"SaveTimeUtc": "2025-09-20T14:33:00Z"}});
        let ts = resolve_timestamp(Some(&doc), None, None).unwrap();
        assert_eq!(ts, at("2025-09-20 14:33:00"));
    }

    #[test]
    fn timestamp_from_filename_fragment() {
        let ts = resolve_timestamp(None, None, Some("save_2025-09-20_14-33-00_slot3.hg"));
        assert_eq!(ts, Some(at("2025-09-20 14:33:00")));
        assert_eq!(resolve_timestamp(None, None, Some("save_final.hg")), None);
    }
}
