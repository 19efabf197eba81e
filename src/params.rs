//! Bound parameter model shared by statement binding and cache keys.
//!
//! [`BoundParameters`] is an ordered map from a parameter name or a 1-based
//! placeholder index to a [`ParamValue`]. Equality and hashing are content based:
//! byte sequences compare by their bytes, floats by their bit pattern, and
//! stream markers never compare equal to anything (including themselves).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, NaiveDateTime};

use crate::types::{RowValues, STREAM_PLACEHOLDER};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Key of a bound parameter: either the template name or a 1-based placeholder position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamKey {
    Index(usize),
    Name(String),
}

impl From<&str> for ParamKey {
    fn from(name: &str) -> Self {
        ParamKey::Name(name.to_string())
    }
}

impl From<String> for ParamKey {
    fn from(name: String) -> Self {
        ParamKey::Name(name)
    }
}

impl From<usize> for ParamKey {
    fn from(index: usize) -> Self {
        ParamKey::Index(index)
    }
}

/// Opaque stream payload. Its content is never compared or rendered.
#[derive(Debug, Clone)]
pub struct StreamMarker {
    id: u64,
    payload: Arc<[u8]>,
}

impl StreamMarker {
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            payload: Arc::from(payload.into()),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Materialize the stream for the driver. Every call yields a fresh buffer.
    #[must_use]
    pub fn to_row_value(&self) -> RowValues {
        RowValues::Blob(self.payload.to_vec())
    }
}

/// Value bound to a template parameter.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Value(RowValues),
    /// Sequence bound to an array parameter (`:ids[]` or `:ids[2]`).
    List(Vec<RowValues>),
    Stream(StreamMarker),
}

impl ParamValue {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, ParamValue::Stream(_))
    }

    #[must_use]
    pub fn render(&self) -> String {
        match self {
            ParamValue::Value(value) => value.render(),
            ParamValue::List(values) => {
                let rendered: Vec<String> = values.iter().map(RowValues::render).collect();
                format!("[{}]", rendered.join(", "))
            }
            ParamValue::Stream(_) => STREAM_PLACEHOLDER.to_string(),
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Value(a), ParamValue::Value(b)) => value_eq(a, b),
            (ParamValue::List(a), ParamValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| value_eq(x, y))
            }
            _ => false,
        }
    }
}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ParamValue::Value(value) => {
                0u8.hash(state);
                hash_value(value, state);
            }
            ParamValue::List(values) => {
                1u8.hash(state);
                values.len().hash(state);
                for value in values {
                    hash_value(value, state);
                }
            }
            // Streams are never equal, so any constant hash is consistent.
            ParamValue::Stream(_) => 2u8.hash(state),
        }
    }
}

fn value_eq(a: &RowValues, b: &RowValues) -> bool {
    match (a, b) {
        (RowValues::Float(x), RowValues::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

fn hash_value<H: Hasher>(value: &RowValues, state: &mut H) {
    std::mem::discriminant(value).hash(state);
    match value {
        RowValues::Int(i) => i.hash(state),
        RowValues::Float(f) => f.to_bits().hash(state),
        RowValues::Text(s) => s.hash(state),
        RowValues::Bool(b) => b.hash(state),
        RowValues::Date(d) => d.hash(state),
        RowValues::Timestamp(ts) => ts.hash(state),
        RowValues::Null => {}
        RowValues::JSON(json) => json.to_string().hash(state),
        RowValues::Blob(bytes) => bytes.hash(state),
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    ParamValue::Value(RowValues::$variant(value.into()))
                }
            }
        )*
    };
}

impl_from_scalar! {
    i64 => Int,
    i32 => Int,
    f64 => Float,
    bool => Bool,
    String => Text,
    &str => Text,
    NaiveDate => Date,
    NaiveDateTime => Timestamp,
    Vec<u8> => Blob,
}

impl From<RowValues> for ParamValue {
    fn from(value: RowValues) -> Self {
        ParamValue::Value(value)
    }
}

impl From<Vec<RowValues>> for ParamValue {
    fn from(values: Vec<RowValues>) -> Self {
        ParamValue::List(values)
    }
}

impl From<StreamMarker> for ParamValue {
    fn from(marker: StreamMarker) -> Self {
        ParamValue::Stream(marker)
    }
}

/// Ordered mapping from parameter name-or-index to its bound value.
///
/// ```rust
/// use sql_template_middleware::prelude::*;
///
/// let mut a = BoundParameters::new();
/// a.set("id", 5_i64).set("name", "ab");
/// let mut b = BoundParameters::new();
/// b.set("name", "ab").set("id", 5_i64);
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParameters {
    values: BTreeMap<ParamKey, ParamValue>,
}

// Reflexivity only fails for stream markers; such snapshots are never used as cache keys.
impl Eq for BoundParameters {}

impl Hash for BoundParameters {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.len().hash(state);
        for (key, value) in &self.values {
            key.hash(state);
            value.hash(state);
        }
    }
}

impl BoundParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a named parameter, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.values
            .insert(ParamKey::Name(name.into()), value.into());
        self
    }

    /// Bind by 1-based placeholder position. Positional bindings win over names.
    pub fn set_index(&mut self, index: usize, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(ParamKey::Index(index), value.into());
        self
    }

    pub fn insert(&mut self, key: ParamKey, value: ParamValue) -> Option<ParamValue> {
        self.values.insert(key, value)
    }

    #[must_use]
    pub fn get(&self, key: &ParamKey) -> Option<&ParamValue> {
        self.values.get(key)
    }

    #[must_use]
    pub fn get_named(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(&ParamKey::Name(name.to_string()))
    }

    pub fn remove(&mut self, key: &ParamKey) -> Option<ParamValue> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &ParamValue)> {
        self.values.iter()
    }

    /// True when any bound value is a stream marker.
    #[must_use]
    pub fn contains_stream(&self) -> bool {
        self.values.values().any(ParamValue::is_stream)
    }

    /// Log/diagnostic rendering with streams and byte sequences masked.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("{");
        for (i, (key, value)) in self.values.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = match key {
                ParamKey::Index(idx) => write!(out, "{idx}={}", value.render()),
                ParamKey::Name(name) => write!(out, "{name}={}", value.render()),
            };
        }
        out.push('}');
        out
    }
}

impl<K: Into<ParamKey>, V: Into<ParamValue>> FromIterator<(K, V)> for BoundParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash_of(params: &BoundParameters) -> u64 {
        let mut hasher = DefaultHasher::new();
        params.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equal_regardless_of_insertion_order() {
        let mut a = BoundParameters::new();
        a.set_index(2, "b").set_index(1, 10_i64);
        let mut b = BoundParameters::new();
        b.set_index(1, 10_i64).set_index(2, "b");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn changing_one_value_breaks_equality() {
        let a: BoundParameters = [("id", 1_i64), ("age", 30)].into_iter().collect();
        let b: BoundParameters = [("id", 1_i64), ("age", 31)].into_iter().collect();
        assert_ne!(a, b);
    }

    #[test]
    fn byte_sequences_compare_by_content() {
        let mut a = BoundParameters::new();
        a.set("data", vec![1_u8, 2, 3]);
        let mut b = BoundParameters::new();
        b.set("data", vec![1_u8, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn stream_markers_never_compare_equal() {
        let marker = StreamMarker::new(vec![9_u8; 4]);
        let mut a = BoundParameters::new();
        a.set("body", marker.clone());
        let b = a.clone();
        assert_ne!(a, b);
        assert!(a.contains_stream());
    }

    #[test]
    fn render_masks_streams_and_bytes() {
        let mut p = BoundParameters::new();
        p.set("blob", vec![0_u8; 1024])
            .set("body", StreamMarker::new(b"secret".to_vec()))
            .set("name", "bob");
        assert_eq!(p.render(), "{blob=<binary>, body=<stream>, name='bob'}");
    }
}
