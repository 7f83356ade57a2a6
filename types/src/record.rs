//! Typed record containers and the `RecordSet` that bundles them.
//!
//! Each record validates a value before it is stored. A rejected insert
//! returns an error and leaves the record exactly as it was.

use std::fmt;
use std::marker::PhantomData;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("{record} does not accept a {found} value (key '{key}')")]
    InvalidValue {
        record: &'static str,
        key: String,
        found: ValueKind,
    },
    #[error("{record} does not accept a list of {found} (key '{key}')")]
    InvalidListElement {
        record: &'static str,
        key: String,
        found: ValueKind,
    },
    #[error("{record} requires homogeneous lists, found {first} and {other} (key '{key}')")]
    MixedList {
        record: &'static str,
        key: String,
        first: ValueKind,
        other: ValueKind,
    },
    #[error("value for '{key}' is a {found}, expected a scalar")]
    NotAScalar { key: String, found: ValueKind },
}

/// An opaque serialized tensor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Array {
    pub dtype: String,
    pub shape: Vec<i64>,
    pub stype: String,
    pub data: Vec<u8>,
}

impl Array {
    #[must_use]
    pub fn new(
        dtype: impl Into<String>,
        shape: Vec<i64>,
        stype: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            dtype: dtype.into(),
            shape,
            stype: stype.into(),
            data,
        }
    }

    #[must_use]
    pub fn num_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Ordered mapping from key to [`Array`].
///
/// Insertion order is significant: legacy parameter lists are rebuilt by
/// walking the keys in the order they were inserted. Equality compares the
/// order too.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParametersRecord {
    arrays: IndexMap<String, Array>,
}

impl PartialEq for ParametersRecord {
    fn eq(&self, other: &Self) -> bool {
        self.arrays.iter().eq(other.arrays.iter())
    }
}

impl Eq for ParametersRecord {}

impl ParametersRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an array. Replacing an existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, array: Array) -> Option<Array> {
        self.arrays.insert(key.into(), array)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Array> {
        self.arrays.get(key)
    }

    /// Remove an array, preserving the order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<Array> {
        self.arrays.shift_remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.arrays.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array)> {
        self.arrays.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Remove and yield every array in insertion order.
    pub fn drain(&mut self) -> impl Iterator<Item = (String, Array)> + '_ {
        self.arrays.drain(..)
    }

    #[must_use]
    pub fn num_bytes(&self) -> usize {
        self.arrays
            .iter()
            .map(|(key, array)| key.len() + array.num_bytes())
            .sum()
    }
}

impl FromIterator<(String, Array)> for ParametersRecord {
    fn from_iter<I: IntoIterator<Item = (String, Array)>>(iter: I) -> Self {
        Self {
            arrays: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ParametersRecord {
    type Item = (String, Array);
    type IntoIter = indexmap::map::IntoIter<String, Array>;

    fn into_iter(self) -> Self::IntoIter {
        self.arrays.into_iter()
    }
}

/// Value constraint applied by a [`TypedRecord`] on every insert.
pub trait ValuePolicy {
    /// Record name used in error messages.
    const NAME: &'static str;

    fn check(key: &str, value: &Value) -> Result<(), RecordError>;
}

/// Int/float scalars and homogeneous int or float lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsPolicy;

/// Bool/bytes/float/int/str scalars and homogeneous lists of one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigsPolicy;

impl ValuePolicy for MetricsPolicy {
    const NAME: &'static str = "MetricsRecord";

    fn check(key: &str, value: &Value) -> Result<(), RecordError> {
        let is_number = |kind: ValueKind| matches!(kind, ValueKind::Int | ValueKind::Float);
        match value {
            Value::Int(_) | Value::Float(_) => Ok(()),
            Value::List(items) => check_list::<Self>(key, items, is_number),
            other => Err(RecordError::InvalidValue {
                record: Self::NAME,
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }
}

impl ValuePolicy for ConfigsPolicy {
    const NAME: &'static str = "ConfigsRecord";

    fn check(key: &str, value: &Value) -> Result<(), RecordError> {
        match value {
            Value::List(items) => check_list::<Self>(key, items, |kind| kind != ValueKind::List),
            _ => Ok(()),
        }
    }
}

fn check_list<P: ValuePolicy>(
    key: &str,
    items: &[Value],
    allowed: impl Fn(ValueKind) -> bool,
) -> Result<(), RecordError> {
    let Some(first) = items.first().map(Value::kind) else {
        return Ok(());
    };
    if !allowed(first) {
        return Err(RecordError::InvalidListElement {
            record: P::NAME,
            key: key.to_string(),
            found: first,
        });
    }
    match items.iter().map(Value::kind).find(|kind| *kind != first) {
        Some(other) => Err(RecordError::MixedList {
            record: P::NAME,
            key: key.to_string(),
            first,
            other,
        }),
        None => Ok(()),
    }
}

/// Key/value record whose values are validated by `P`.
pub struct TypedRecord<P> {
    values: IndexMap<String, Value>,
    policy: PhantomData<fn() -> P>,
}

pub type MetricsRecord = TypedRecord<MetricsPolicy>;
pub type ConfigsRecord = TypedRecord<ConfigsPolicy>;

impl<P: ValuePolicy> TypedRecord<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: IndexMap::new(),
            policy: PhantomData,
        }
    }

    /// Validate and store `value` under `key`, returning any previous value.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, RecordError> {
        let key = key.into();
        let value = value.into();
        P::check(&key, &value)?;
        Ok(self.values.insert(key, value))
    }

    /// Builder form of [`Self::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self, RecordError> {
        self.set(key, value)?;
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (String, Value)> + '_ {
        self.values.drain(..)
    }
}

impl<P: ValuePolicy> Default for TypedRecord<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for TypedRecord<P> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            policy: PhantomData,
        }
    }
}

impl<P> PartialEq for TypedRecord<P> {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl<P: ValuePolicy> fmt::Debug for TypedRecord<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(P::NAME).field(&self.values).finish()
    }
}

impl<P: ValuePolicy> TryFrom<IndexMap<String, Value>> for TypedRecord<P> {
    type Error = RecordError;

    fn try_from(values: IndexMap<String, Value>) -> Result<Self, Self::Error> {
        for (key, value) in &values {
            P::check(key, value)?;
        }
        Ok(Self {
            values,
            policy: PhantomData,
        })
    }
}

impl<P> IntoIterator for TypedRecord<P> {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<P> Serialize for TypedRecord<P> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl<'de, P: ValuePolicy> Deserialize<'de> for TypedRecord<P> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = IndexMap::<String, Value>::deserialize(deserializer)?;
        Self::try_from(values).map_err(serde::de::Error::custom)
    }
}

/// Named parameters, metrics and configs records carried by a message.
///
/// Keys are namespaced by convention (`"fitins.parameters"`,
/// `"fitins.config"`); any number of records of each kind may coexist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub parameters_records: IndexMap<String, ParametersRecord>,
    pub metrics_records: IndexMap<String, MetricsRecord>,
    pub configs_records: IndexMap<String, ConfigsRecord>,
}

impl RecordSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_parameters(mut self, key: impl Into<String>, record: ParametersRecord) -> Self {
        self.parameters_records.insert(key.into(), record);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, key: impl Into<String>, record: MetricsRecord) -> Self {
        self.metrics_records.insert(key.into(), record);
        self
    }

    #[must_use]
    pub fn with_configs(mut self, key: impl Into<String>, record: ConfigsRecord) -> Self {
        self.configs_records.insert(key.into(), record);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters_records.is_empty()
            && self.metrics_records.is_empty()
            && self.configs_records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_accepts_numbers_and_numeric_lists() {
        let mut record = MetricsRecord::new();
        record.set("loss", 0.25).unwrap();
        record.set("num_examples", 32_i64).unwrap();
        record.set("accs", vec![0.5, 0.75]).unwrap();
        record.set("empty", Vec::<i64>::new()).unwrap();
        assert_eq!(record.len(), 4);
    }

    #[test]
    fn metrics_rejects_strings_without_mutating() {
        let mut record = MetricsRecord::new();
        record.set("loss", 0.25).unwrap();
        let err = record.set("loss", "high").unwrap_err();
        assert!(matches!(err, RecordError::InvalidValue { found: ValueKind::Str, .. }));
        assert_eq!(record.get("loss"), Some(&Value::Float(0.25)));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn metrics_rejects_bool_and_mixed_lists() {
        let mut record = MetricsRecord::new();
        assert!(record.set("flag", true).is_err());
        let mixed = Value::List(vec![Value::Int(1), Value::Float(2.0)]);
        assert!(matches!(
            record.set("mixed", mixed).unwrap_err(),
            RecordError::MixedList { .. }
        ));
        assert!(record.is_empty());
    }

    #[test]
    fn configs_rejects_nested_lists() {
        let mut record = ConfigsRecord::new();
        let nested = Value::List(vec![Value::from(vec![1_i64]), Value::from(vec![2_i64])]);
        let err = record.set("grid", nested).unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidListElement { found: ValueKind::List, .. }
        ));
        assert!(!record.contains_key("grid"));
    }

    #[test]
    fn configs_accepts_every_scalar_kind() {
        let record = ConfigsRecord::new()
            .with("b", true)
            .and_then(|r| r.with("by", vec![1_u8, 2]))
            .and_then(|r| r.with("f", 1.5))
            .and_then(|r| r.with("i", 3_i64))
            .and_then(|r| r.with("s", "x"))
            .and_then(|r| r.with("ls", vec!["a".to_string(), "b".to_string()]))
            .unwrap();
        assert_eq!(record.len(), 6);
    }

    #[test]
    fn typed_record_equality_ignores_order() {
        let a = ConfigsRecord::new().with("x", 1_i64).and_then(|r| r.with("y", 2_i64));
        let b = ConfigsRecord::new().with("y", 2_i64).and_then(|r| r.with("x", 1_i64));
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn parameters_record_preserves_insertion_order() {
        let mut record = ParametersRecord::new();
        for key in ["b", "a", "c"] {
            record.insert(key, Array::default());
        }
        record.remove("a");
        record.insert("d", Array::default());
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["b", "c", "d"]);
    }

    #[test]
    fn parameters_record_equality_respects_order() {
        let first = Array::new("u8", vec![1], "bytes", vec![1]);
        let second = Array::new("u8", vec![1], "bytes", vec![2]);
        let forward: ParametersRecord = [
            ("0".to_string(), first.clone()),
            ("1".to_string(), second.clone()),
        ]
        .into_iter()
        .collect();
        let reversed: ParametersRecord = [
            ("1".to_string(), second.clone()),
            ("0".to_string(), first.clone()),
        ]
        .into_iter()
        .collect();
        assert_ne!(forward, reversed);

        let mut rebuilt = ParametersRecord::new();
        rebuilt.insert("0", first);
        rebuilt.insert("1", second);
        assert_eq!(forward, rebuilt);
    }

    #[test]
    fn deserialize_validates_values() {
        let ok: MetricsRecord = serde_json::from_str(r#"{"loss":{"Float":0.5}}"#).unwrap();
        assert_eq!(ok.get("loss"), Some(&Value::Float(0.5)));
        let bad = serde_json::from_str::<MetricsRecord>(r#"{"name":{"Str":"x"}}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn record_set_holds_many_named_records() {
        let set = RecordSet::new()
            .with_parameters("fitins.parameters", ParametersRecord::new())
            .with_configs("fitins.config", ConfigsRecord::new())
            .with_configs("extra.config", ConfigsRecord::new());
        assert_eq!(set.configs_records.len(), 2);
        assert!(!set.is_empty());
        assert!(RecordSet::new().is_empty());
    }
}
