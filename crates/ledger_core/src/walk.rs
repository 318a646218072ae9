//! Worklist-based traversal over arbitrarily nested JSON documents.
//!
//! Save documents are deep and adversarially shaped, so the walker uses an
//! explicit stack instead of recursion. Paths are kept in an append-only
//! arena: each queued node records only its parent index and its own
//! segment, and a full [`JsonPath`] is materialized on demand.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// A path from the document root to one subtree: a sequence of object keys
/// and array indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JsonPath(pub Vec<PathSeg>);

impl JsonPath {
    pub fn root() -> Self {
        JsonPath(Vec::new())
    }

    /// The key of the last segment, when it is a key.
    pub fn last_key(&self) -> Option<&str> {
        match self.0.last() {
            Some(PathSeg::Key(k)) => Some(k.as_str()),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<JsonPath> {
        if self.0.is_empty() {
            None
        } else {
            Some(JsonPath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Printable form of the last `limit` segments, dot-joined. Used by the
    /// bounded substring fallbacks.
    pub fn tail_string(&self, limit: usize) -> String {
        let start = self.0.len().saturating_sub(limit);
        let segs: Vec<String> = self.0[start..]
            .iter()
            .map(|s| match s {
                PathSeg::Key(k) => k.replace('.', "\\."),
                PathSeg::Index(i) => format!("[{i}]"),
            })
            .collect();
        segs.join(".")
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tail_string(usize::MAX))
    }
}

impl FromStr for JsonPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(JsonPath::root());
        }

        // Split on unescaped dots.
        let mut tokens: Vec<String> = Vec::new();
        let mut cur = String::new();
        let mut esc = false;
        for ch in s.chars() {
            if esc {
                cur.push(ch);
                esc = false;
            } else if ch == '\\' {
                esc = true;
            } else if ch == '.' {
                tokens.push(std::mem::take(&mut cur));
            } else {
                cur.push(ch);
            }
        }
        tokens.push(cur);

        let mut segs: Vec<PathSeg> = Vec::new();
        for tok in tokens {
            if let Some(stripped) = tok.strip_suffix(']')
                && let Some((base, idx)) = stripped.rsplit_once('[')
            {
                if !base.is_empty() {
                    segs.push(PathSeg::Key(base.to_string()));
                }
                let n: usize = idx
                    .parse()
                    .map_err(|_| format!("bad array index in path token {tok:?}"))?;
                segs.push(PathSeg::Index(n));
            } else if tok.is_empty() {
                return Err(format!("empty segment in path {s:?}"));
            } else {
                segs.push(PathSeg::Key(tok));
            }
        }
        Ok(JsonPath(segs))
    }
}

impl Serialize for JsonPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for JsonPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Resolve a path against a document. Returns `None` on any type or bounds
/// mismatch rather than erroring; stale override paths are expected.
pub fn get_at_path<'a>(doc: &'a Value, path: &JsonPath) -> Option<&'a Value> {
    let mut cur = doc;
    for seg in &path.0 {
        cur = match (cur, seg) {
            (Value::Object(map), PathSeg::Key(k)) => map.get(k)?,
            (Value::Array(items), PathSeg::Index(i)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Preorder iterator over every node in a document, root included, yielding
/// `(path, value)` pairs.
pub struct Walker<'a> {
    // (parent arena index, own segment); the root has no entry.
    arena: Vec<(Option<usize>, PathSeg)>,
    stack: Vec<(Option<usize>, &'a Value)>,
}

impl<'a> Walker<'a> {
    pub fn new(root: &'a Value) -> Self {
        Walker {
            arena: Vec::new(),
            stack: vec![(None, root)],
        }
    }

    fn materialize(&self, node: Option<usize>) -> JsonPath {
        let mut segs = Vec::new();
        let mut cur = node;
        while let Some(i) = cur {
            segs.push(self.arena[i].1.clone());
            cur = self.arena[i].0;
        }
        segs.reverse();
        JsonPath(segs)
    }
}

impl<'a> Iterator for Walker<'a> {
    type Item = (JsonPath, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, value) = self.stack.pop()?;
        match value {
            Value::Object(map) => {
                for (k, v) in map.iter().rev() {
                    let id = self.arena.len();
                    self.arena.push((node, PathSeg::Key(k.clone())));
                    self.stack.push((Some(id), v));
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate().rev() {
                    let id = self.arena.len();
                    self.arena.push((node, PathSeg::Index(i)));
                    self.stack.push((Some(id), v));
                }
            }
            _ => {}
        }
        Some((self.materialize(node), value))
    }
}
