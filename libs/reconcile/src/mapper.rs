//! Field mapping between typed specs, attribute maps and wire objects.
//!
//! A resource kind declares a typed spec struct. The spec renders itself
//! to an [`AttrMap`] holding only the fields the user set explicitly;
//! the reconciler diffs attribute maps, never raw wire objects.
//!
//! Unordered collections are [`AttrValue::Set`], backed by a `BTreeSet`
//! so that membership rather than insertion order decides equality.
//! [`SpecHash`] gives a stable fingerprint of any value for logging and
//! quick comparison; equality decisions never rely on it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// A typed attribute value.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<AttrValue>),
    Set(BTreeSet<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

/// Attribute name to value, in canonical (sorted) key order.
pub type AttrMap = BTreeMap<String, AttrValue>;

impl AttrValue {
    /// Builds a set of strings.
    pub fn string_set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::Float(_) => 2,
            Self::String(_) => 3,
            Self::List(_) => 4,
            Self::Set(_) => 5,
            Self::Map(_) => 6,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts to JSON. Sets become arrays in canonical order.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => items.iter().map(Self::to_json).collect(),
            Self::Set(items) => items.iter().map(Self::to_json).collect(),
            Self::Map(map) => attrs_to_json(map),
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AttrValue {}

impl PartialOrd for AttrValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttrValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Set(a), Self::Set(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Converts an attribute map to a JSON object.
pub fn attrs_to_json(attrs: &AttrMap) -> serde_json::Value {
    serde_json::Value::Object(
        attrs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// A typed spec that can render its explicitly-set fields.
pub trait Attributes {
    /// Attribute map of every explicitly-set field. Unset optional
    /// fields and empty collections are omitted.
    fn to_attrs(&self) -> AttrMap;
}

/// Bidirectional mapping between a spec and the wire format.
///
/// `from_wire` applied to the object the remote builds from
/// `to_wire(spec)` must reproduce every explicitly-set field of `spec`;
/// it may add server-computed defaults.
pub trait FieldMapper {
    type Spec: Attributes + Clone + Debug + Send + Sync;
    type Request: Debug + Send + Sync;
    type Object: Clone + Debug + Serialize + Send + Sync;

    /// Expand a spec into a create request.
    fn to_wire(spec: &Self::Spec) -> Self::Request;

    /// Flatten a remote object back into a spec.
    fn from_wire(object: &Self::Object) -> Self::Spec;
}

/// Per-field update semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: &'static str,

    /// Can be changed in place by an update call.
    pub mutable: bool,

    /// The server fills in a default when the user leaves it unset.
    pub computed: bool,
}

impl FieldSchema {
    pub const fn immutable(name: &'static str) -> Self {
        Self {
            name,
            mutable: false,
            computed: false,
        }
    }

    pub const fn mutable(name: &'static str) -> Self {
        Self {
            name,
            mutable: true,
            computed: false,
        }
    }

    pub const fn computed(self) -> Self {
        Self {
            computed: true,
            ..self
        }
    }
}

/// Fields that differ between observed and desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDiff {
    pub mutable: BTreeSet<String>,
    pub immutable: BTreeSet<String>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.mutable.is_empty() && self.immutable.is_empty()
    }

    pub fn has_immutable(&self) -> bool {
        !self.immutable.is_empty()
    }
}

/// Diff observed attributes against desired ones.
///
/// A computed field the desired map omits is left to the server and never
/// counts as a change. Fields missing from `schema` are immutable.
pub fn diff_attrs(schema: &[FieldSchema], current: &AttrMap, desired: &AttrMap) -> FieldDiff {
    let mut diff = FieldDiff::default();
    let keys: BTreeSet<&String> = current.keys().chain(desired.keys()).collect();

    for key in keys {
        let want = desired.get(key);
        if want == current.get(key) {
            continue;
        }

        let field = schema.iter().find(|f| f.name == key.as_str());
        if want.is_none() && field.is_some_and(|f| f.computed) {
            continue;
        }

        if field.is_some_and(|f| f.mutable) {
            diff.mutable.insert(key.clone());
        } else {
            diff.immutable.insert(key.clone());
        }
    }

    diff
}

/// Names the explicitly-set fields of `original` that `round_tripped`
/// lost or changed.
pub fn explicit_field_mismatches(original: &AttrMap, round_tripped: &AttrMap) -> Vec<String> {
    original
        .iter()
        .filter(|(k, v)| round_tripped.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect()
}

/// A spec hash for deterministic comparison.
///
/// Used as a fingerprint of desired state and of individual set members.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Hash of an attribute map.
    pub fn of_attrs(attrs: &AttrMap) -> Self {
        Self::from_json(&attrs_to_json(attrs))
    }

    /// Hash of a single value, e.g. one member of a set.
    pub fn of_value(value: &AttrValue) -> Self {
        Self::from_json(&value.to_json())
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}
