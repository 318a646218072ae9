//! Format knowledge for the reverse-engineered save container and its
//! obfuscated JSON schema.
//!
//! Every magic number, fixed key string and tuned heuristic constant lives
//! here so that a format revision touches one module. The short key names
//! are not mnemonic; they are what the obfuscated saves actually contain
//! and have changed between format revisions before.

/// Magic number introducing one compressed block in the block stream.
pub const BLOCK_MAGIC: u32 = 0xFEED_A1E5;

/// Block header layout: magic, compressed size, decompressed size, padding
/// (all little-endian u32).
pub const BLOCK_HEADER_LEN: usize = 16;

/// LZ4 frame container magic prefix.
pub const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// gzip container magic prefix.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Sigil character prefixing every resource identifier.
pub const RESOURCE_SIGIL: char = '^';

// --- Obfuscated slot keys (current format revision) ---

/// Resource identifier inside a slot dict.
pub const KEY_SLOT_ID: &str = "b2n";
/// Slot amount.
pub const KEY_SLOT_AMOUNT: &str = "1o9";
/// Slot stack capacity. Easily mistaken for the amount; see the extractor.
pub const KEY_SLOT_CAPACITY: &str = "F9q";
/// Wrapper object holding the item-type tag.
pub const KEY_SLOT_TYPE_WRAPPER: &str = "Vn8";
/// Item-type tag inside the wrapper ("Product" / "Substance" / "Technology").
pub const KEY_SLOT_TYPE_INNER: &str = "elv";
/// Grid-coordinate object inside a slot dict.
pub const KEY_SLOT_GRID: &str = "3ZH";
/// Grid column inside the coordinate object.
pub const KEY_GRID_X: &str = ">Qh";
/// Grid row inside the coordinate object.
pub const KEY_GRID_Y: &str = "XJ>";
/// Slot-list key under each inventory section.
pub const KEY_SLOT_LIST: &str = "hl?";

// --- Readable-variant slot keys (pre-obfuscation saves) ---

pub const READABLE_ID_KEYS: &[&str] = &["Id", "ProductId", "SubstanceId"];
pub const READABLE_AMOUNT_KEYS: &[&str] = &["Amount", "Qty", "Quantity"];
pub const READABLE_CAPACITY_KEYS: &[&str] = &["MaxAmount"];
pub const READABLE_TYPE_KEYS: &[&str] = &["InventoryType", "Type"];
pub const READABLE_GRID_KEYS: &[&str] = &["Index"];
pub const READABLE_GRID_X: &str = "X";
pub const READABLE_GRID_Y: &str = "Y";

// --- Owner path tokens ---

pub const OWNER_TOKEN_SUIT: &str = ";l5";
pub const OWNER_TOKEN_SHIP: &str = "P;m";
pub const OWNER_TOKEN_FREIGHTER: &str = "<IP";
pub const OWNER_TOKEN_STORAGE: &str = "3Nc";
pub const OWNER_TOKEN_VEHICLE: &str = "8ZP";

/// Readable-variant owner needles, lowercase, matched by containment.
pub const NEEDLES_SUIT: &[&str] = &["exosuit", "suit"];
pub const NEEDLES_SHIP: &[&str] = &["shipownership", "starship", "ship", "shuttle", "fighter", "hauler"];
pub const NEEDLES_FREIGHTER: &[&str] = &["freighter", "capital", "carrier"];
pub const NEEDLES_VEHICLE: &[&str] = &[
    "vehicleownership",
    "vehicle",
    "exocraft",
    "minotaur",
    "nautilon",
    "roamer",
    "nomad",
    "colossus",
    "pilgrim",
];
pub const NEEDLES_STORAGE: &[&str] = &["storage", "container", "chest", "vault"];

// --- Inventory-kind tokens ---

pub const KIND_TOKEN_TECH: &str = "PMT";
pub const KIND_TOKEN_CARGO: &str = "gan";

/// Bound on how many trailing path segments the owner fallback scan joins.
pub const OWNER_PATH_LIMIT: usize = 256;

// --- Deny-list for progress/quest/season counters ---

/// Literal resource-id stem prefixes that are progress counters, not items.
pub const DENY_PREFIXES: &[&str] = &["SMUGGLE_", "FLYER", "BIGGS_", "POLICE_", "GET_"];

/// Stack capacities observed in real saves and considered trustworthy.
pub const SANE_CAPS: &[i64] = &[50, 100, 101, 200, 250, 500, 801, 1000, 1001, 2000, 9999];

/// Amounts at or above this, paired with a tiny implausible capacity, mark a
/// corrupt or junk slot.
pub const JUNK_AMOUNT_FLOOR: i64 = 9999;

pub fn is_sane_cap(cap: i64) -> bool {
    SANE_CAPS.contains(&cap)
}

/// Season/expedition counter stems look like `S19_...`: `S`, two digits, `_`.
pub fn is_season_counter(stem: &str) -> bool {
    let b = stem.as_bytes();
    b.len() >= 4
        && b[0] == b'S'
        && b[1].is_ascii_digit()
        && b[2].is_ascii_digit()
        && b[3] == b'_'
}

/// True for ids that must never enter item accounting.
pub fn is_denied_resource(id: &str) -> bool {
    let stem = id.strip_prefix(RESOURCE_SIGIL).unwrap_or(id);
    DENY_PREFIXES.iter().any(|p| stem.starts_with(p)) || is_season_counter(stem)
}

/// A resource tag is the sigil followed by uppercase alphanumerics or
/// underscores.
pub fn is_resource_tag(s: &str) -> bool {
    let Some(stem) = s.strip_prefix(RESOURCE_SIGIL) else {
        return false;
    };
    !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Recognize readable "storage container N" key fragments and produce a
/// stable container tag for them.
pub fn storage_container_tag(key: &str) -> Option<String> {
    // The fragment may be embedded in a longer key ("Chest5Inventory").
    if let Some(rest) = key.strip_prefix("Chest") {
        if rest.starts_with("Magic2") {
            return Some("STORAGEM2".to_string());
        }
        if rest.starts_with("Magic") {
            return Some("STORAGEM".to_string());
        }
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            return Some(format!("STORAGE{digits}"));
        }
    }
    let lk = key.to_ascii_lowercase();
    for prefix in ["storagecontainer", "storage_container", "storage container"] {
        if let Some(rest) = lk.strip_prefix(prefix) {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if !digits.is_empty() {
                return Some(format!("STORAGE{digits}"));
            }
        }
    }
    None
}

/// Plausible slot-array length bounds, inclusive.
///
/// Tuned empirically against observed saves, not a structural fact: 5..=120
/// matches most format revisions, 10..=250 appears in one variant. Kept
/// configurable for exactly that reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBounds {
    pub min: usize,
    pub max: usize,
}

impl SlotBounds {
    pub const WIDE: SlotBounds = SlotBounds { min: 10, max: 250 };

    pub fn contains(&self, len: usize) -> bool {
        len >= self.min && len <= self.max
    }
}

impl Default for SlotBounds {
    fn default() -> Self {
        SlotBounds { min: 5, max: 120 }
    }
}
