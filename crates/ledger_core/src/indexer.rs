//! Structural indexing of a recovered save document.
//!
//! Key names in the obfuscated schema are short, non-mnemonic and unstable
//! across format revisions, so inventory containers are located by *shape*:
//! a non-empty array of uniform objects whose length falls in a plausible
//! slot-count range. A secondary pass groups candidate arrays by their
//! parent, because one physical owner exposes one to three sibling slot
//! arrays (general/tech/cargo); lone same-shaped arrays elsewhere in the
//! tree rarely survive that grouping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::{InventoryKind, infer_kind, infer_owner};
use crate::format::{self, SlotBounds};
use crate::walk::{JsonPath, Walker, get_at_path};

pub const CAT_INVENTORIES: &str = "inventories";
pub const CAT_MILESTONES: &str = "milestones";
pub const CAT_BASES: &str = "bases";
pub const CAT_TELEPORTERS: &str = "teleporter_history";
pub const CAT_COMPANIONS: &str = "companions";

/// Lowercase key fragments that identify ancillary sections in
/// readable-variant saves.
const ANCILLARY_NEEDLES: &[(&str, &[&str])] = &[
    (CAT_MILESTONES, &["milestone", "journey"]),
    (CAT_BASES, &["persistentplayerbase", "basebuilding"]),
    (CAT_TELEPORTERS, &["teleport"]),
    (CAT_COMPANIONS, &["companion", "creaturepet"]),
];

/// Outcome of a shape predicate. `Ambiguous` marks values that look right
/// structurally but fall outside the tuned bounds, so callers can compose
/// heuristics and overrides instead of collapsing to a boolean early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeCheck {
    Confirmed,
    Rejected,
    Ambiguous,
}

/// Does this value look like a slot array?
pub fn slot_array_shape(value: &Value, bounds: SlotBounds) -> ShapeCheck {
    let Value::Array(items) = value else {
        return ShapeCheck::Rejected;
    };
    if items.is_empty() || !items.iter().all(Value::is_object) {
        return ShapeCheck::Rejected;
    }
    if bounds.contains(items.len()) {
        ShapeCheck::Confirmed
    } else {
        ShapeCheck::Ambiguous
    }
}

/// Mapping from semantic category to the deduplicated, discovery-ordered
/// list of tree paths belonging to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathIndex {
    pub categories: BTreeMap<String, Vec<JsonPath>>,
}

impl PathIndex {
    pub fn paths(&self, category: &str) -> &[JsonPath] {
        self.categories.get(category).map_or(&[], Vec::as_slice)
    }

    pub fn inventories(&self) -> &[JsonPath] {
        self.paths(CAT_INVENTORIES)
    }

    fn insert_unique(&mut self, category: &str, path: JsonPath) {
        let list = self.categories.entry(category.to_string()).or_default();
        if !list.contains(&path) {
            list.push(path);
        }
    }
}

/// Externally supplied section→paths map. Trusted over the heuristics for
/// inventories (false positives there corrupt quantity rollups directly);
/// unioned with heuristic results everywhere else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionOverrides(pub BTreeMap<String, Vec<JsonPath>>);

#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    pub bounds: SlotBounds,
    pub overrides: SectionOverrides,
}

pub fn index(doc: &Value) -> PathIndex {
    index_with(doc, &IndexerConfig::default())
}

pub fn index_with(doc: &Value, config: &IndexerConfig) -> PathIndex {
    let mut candidates: Vec<JsonPath> = Vec::new();
    let mut needle_hits: BTreeMap<&str, Vec<JsonPath>> = BTreeMap::new();
    let mut coord_lists: Vec<JsonPath> = Vec::new();

    for (path, value) in Walker::new(doc) {
        if !value.is_array() {
            continue;
        }
        if slot_array_shape(value, config.bounds) == ShapeCheck::Confirmed
            && !candidates.contains(&path)
        {
            candidates.push(path.clone());
        }
        if let Some(key) = path.last_key() {
            let lk = key.to_ascii_lowercase();
            for &(category, needles) in ANCILLARY_NEEDLES {
                if needles.iter().any(|n| lk.contains(n))
                    && value.as_array().is_some_and(|a| !a.is_empty())
                {
                    needle_hits.entry(category).or_default().push(path.clone());
                    break;
                }
            }
        }
        if is_coordinate_list(value) {
            coord_lists.push(path.clone());
        }
    }

    let mut out = PathIndex::default();

    // Inventories: overrides replace the heuristic entirely when present.
    let override_inventories = config
        .overrides
        .0
        .get(CAT_INVENTORIES)
        .filter(|v| !v.is_empty());
    match override_inventories {
        Some(paths) => {
            for p in paths {
                out.insert_unique(CAT_INVENTORIES, p.clone());
            }
        }
        None => {
            for p in confirm_sibling_groups(&candidates) {
                out.insert_unique(CAT_INVENTORIES, p);
            }
        }
    }

    for (category, hits) in needle_hits {
        for p in hits {
            out.insert_unique(category, p);
        }
    }

    // Obfuscated saves expose no readable ancillary keys; arrays of bare
    // coordinate pairs are the one shape cue left and they mark teleport
    // history.
    if out.paths(CAT_TELEPORTERS).is_empty() && out.paths(CAT_BASES).is_empty() {
        for p in coord_lists {
            out.insert_unique(CAT_TELEPORTERS, p);
        }
    }

    // Non-inventory overrides are unioned, never replacing.
    for (category, paths) in &config.overrides.0 {
        if category == CAT_INVENTORIES {
            continue;
        }
        for p in paths {
            out.insert_unique(category, p.clone());
        }
    }

    out
}

/// Keep only slot-array candidates whose parent holds 1..=3 candidate
/// siblings, preserving discovery order.
fn confirm_sibling_groups(candidates: &[JsonPath]) -> Vec<JsonPath> {
    let mut group_sizes: BTreeMap<String, usize> = BTreeMap::new();
    for p in candidates {
        let parent = p.parent().map(|pp| pp.to_string()).unwrap_or_default();
        *group_sizes.entry(parent).or_insert(0) += 1;
    }
    candidates
        .iter()
        .filter(|p| {
            let parent = p.parent().map(|pp| pp.to_string()).unwrap_or_default();
            group_sizes.get(&parent).is_some_and(|&n| n <= 3)
        })
        .cloned()
        .collect()
}

/// Group confirmed inventory paths by their parent path, in first-seen
/// order. Each group is one physical container owner.
pub fn container_groups(index: &PathIndex) -> Vec<(JsonPath, Vec<JsonPath>)> {
    let mut order: Vec<JsonPath> = Vec::new();
    let mut groups: BTreeMap<String, Vec<JsonPath>> = BTreeMap::new();
    for p in index.inventories() {
        let parent = p.parent().unwrap_or_else(JsonPath::root);
        let key = parent.to_string();
        if !groups.contains_key(&key) {
            order.push(parent.clone());
        }
        groups.entry(key).or_default().push(p.clone());
    }
    order
        .into_iter()
        .map(|parent| {
            let members = groups.remove(&parent.to_string()).unwrap_or_default();
            (parent, members)
        })
        .collect()
}

/// An array of objects that each carry a bare top-level coordinate pair and
/// no resource id. Slot dicts keep their coordinates nested one level down,
/// so they do not match.
fn is_coordinate_list(value: &Value) -> bool {
    let Value::Array(items) = value else {
        return false;
    };
    !items.is_empty()
        && items.iter().all(|v| {
            let Value::Object(map) = v else {
                return false;
            };
            map.get(format::KEY_GRID_X).is_some_and(Value::is_i64)
                && map.get(format::KEY_GRID_Y).is_some_and(Value::is_i64)
                && !map.contains_key(format::KEY_SLOT_ID)
        })
}

/// Per-kind slot counts for one rollup bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub general: usize,
    pub tech: usize,
    pub cargo: usize,
    pub total: usize,
}

impl KindCounts {
    fn add(&mut self, kind: InventoryKind, n: usize) {
        match kind {
            InventoryKind::General => self.general += n,
            InventoryKind::Tech => self.tech += n,
            InventoryKind::Cargo => self.cargo += n,
        }
        self.total += n;
    }
}

/// Lightweight rollup of what the index found, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexSummary {
    pub containers: usize,
    pub slots: KindCounts,
    pub by_owner: BTreeMap<String, KindCounts>,
    pub milestones: usize,
    pub bases: usize,
    pub teleporters: usize,
    pub companions: usize,
}

pub fn summarize(doc: &Value, index: &PathIndex) -> IndexSummary {
    let mut summary = IndexSummary {
        containers: container_groups(index).len(),
        ..IndexSummary::default()
    };

    for path in index.inventories() {
        let Some(Value::Array(items)) = get_at_path(doc, path) else {
            continue;
        };
        let kind = infer_kind(path);
        summary.slots.add(kind, items.len());
        summary
            .by_owner
            .entry(infer_owner(path).as_str().to_string())
            .or_default()
            .add(kind, items.len());
    }

    let count_items = |category: &str| -> usize {
        index
            .paths(category)
            .iter()
            .filter_map(|p| get_at_path(doc, p))
            .filter_map(Value::as_array)
            .map(Vec::len)
            .sum()
    };
    summary.milestones = count_items(CAT_MILESTONES);
    summary.bases = count_items(CAT_BASES);
    summary.teleporters = count_items(CAT_TELEPORTERS);
    summary.companions = count_items(CAT_COMPANIONS);
    summary
}
