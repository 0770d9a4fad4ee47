//! Flattened key/value encoder.
//!
//! [`DictionaryWriter`] turns a nested write sequence into two flat maps:
//!
//! - `properties`: dotted key → `Option<String>`, where `None` is an explicit
//!   null placeholder for an absent scalar, nested object, list or string map
//! - `measurements`: dotted key → `f64`, filled only by
//!   [`write_f64_map`](SerializationWriter::write_f64_map); an absent map
//!   records nothing
//!
//! Keys are the enclosing prefix, a dot, then the field name. Unnamed
//! objects get a generated segment: `Obj<n>` when opened with
//! [`write_start_anonymous_object`](SerializationWriter::write_start_anonymous_object),
//! `Key<n>` when written whole with
//! [`write_anonymous_object`](SerializationWriter::write_anonymous_object).
//! `n` counts from 1 within each open object. List items are keyed
//! `name0`, `name1`, ...
//!
//! The first write to a key wins. Later writes to the same key are dropped,
//! so fallback values written after explicit ones never replace them.
//!
//! # Examples
//!
//! ```rust
//! use quickpulse::serialization::dictionary::DictionaryWriter;
//! use quickpulse::serialization::SerializationWriter;
//!
//! let mut writer = DictionaryWriter::new();
//! writer.write_start_object("Request").unwrap();
//! writer.write_str("Name", Some("GET /")).unwrap();
//! writer.write_str("Name", Some("fallback")).unwrap();
//! writer.write_end_object().unwrap();
//! writer.write_object("Parent", None).unwrap();
//!
//! assert_eq!(writer.property("Request.Name"), Some(Some("GET /")));
//! assert_eq!(writer.property("Parent"), Some(None));
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{QuickPulseError, Result};
use crate::serialization::{format_duration, format_timestamp, Serializable, SerializationWriter};

/// Prefix segment generated for objects opened without a name.
pub const DEFAULT_OBJECT_KEY: &str = "Obj";

/// Prefix segment generated for unnamed objects written whole.
pub const DEFAULT_KEY: &str = "Key";

/// Writes a flat dotted-key representation.
#[derive(Debug)]
pub struct DictionaryWriter {
    properties: BTreeMap<String, Option<String>>,
    measurements: BTreeMap<String, f64>,
    prefixes: Vec<String>,
    indices: Vec<u64>,
    current_prefix: String,
    current_index: u64,
}

/// Borrowed view of both maps, used to render the flat form as JSON.
#[derive(Serialize)]
struct FlatView<'a> {
    properties: &'a BTreeMap<String, Option<String>>,
    measurements: &'a BTreeMap<String, f64>,
}

impl Default for DictionaryWriter {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
            prefixes: Vec::new(),
            indices: Vec::new(),
            current_prefix: String::new(),
            current_index: 1,
        }
    }
}

impl DictionaryWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// All accumulated properties. `None` values are null placeholders.
    pub fn properties(&self) -> &BTreeMap<String, Option<String>> {
        &self.properties
    }

    /// All accumulated measurements.
    pub fn measurements(&self) -> &BTreeMap<String, f64> {
        &self.measurements
    }

    /// Looks up a property: `None` if never written, `Some(None)` for a null
    /// placeholder.
    pub fn property(&self, key: &str) -> Option<Option<&str>> {
        self.properties.get(key).map(|value| value.as_deref())
    }

    /// Looks up a measurement.
    pub fn measurement(&self, key: &str) -> Option<f64> {
        self.measurements.get(key).copied()
    }

    /// Consumes the writer, returning `(properties, measurements)`.
    pub fn into_parts(self) -> (BTreeMap<String, Option<String>>, BTreeMap<String, f64>) {
        (self.properties, self.measurements)
    }

    /// Renders both maps as `{"properties":{..},"measurements":{..}}`.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(&FlatView {
            properties: &self.properties,
            measurements: &self.measurements,
        })
    }

    fn key(&self, field: &str) -> String {
        if self.current_prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.current_prefix, field)
        }
    }

    fn next_sequential_key(&mut self, segment: &str) -> String {
        let key = self.key(&format!("{segment}{}", self.current_index));
        self.current_index += 1;
        key
    }

    fn insert_property(&mut self, key: String, value: Option<String>) {
        self.properties.entry(key).or_insert(value);
    }

    fn write_scalar(&mut self, name: &str, value: Option<String>) -> Result<()> {
        check_name(name)?;
        let key = self.key(name);
        self.insert_property(key, value);
        Ok(())
    }

    fn write_null(&mut self, name: &str) {
        let key = self.key(name);
        self.insert_property(key, None);
    }

    fn with_prefix(&mut self, prefix: String, value: &dyn Serializable) -> Result<()> {
        let previous = std::mem::replace(&mut self.current_prefix, prefix);
        let result = value.serialize(self);
        self.current_prefix = previous;
        result
    }
}

impl SerializationWriter for DictionaryWriter {
    fn write_start_object(&mut self, name: &str) -> Result<()> {
        check_name(name)?;
        let prefix = self.key(name);
        self.prefixes.push(std::mem::replace(&mut self.current_prefix, prefix));
        self.indices.push(self.current_index);
        self.current_index = 1;
        Ok(())
    }

    fn write_start_anonymous_object(&mut self) -> Result<()> {
        let prefix = self.next_sequential_key(DEFAULT_OBJECT_KEY);
        self.prefixes.push(std::mem::replace(&mut self.current_prefix, prefix));
        self.indices.push(self.current_index);
        self.current_index = 1;
        Ok(())
    }

    fn write_end_object(&mut self) -> Result<()> {
        match (self.prefixes.pop(), self.indices.pop()) {
            (Some(prefix), Some(index)) => {
                self.current_prefix = prefix;
                self.current_index = index;
                Ok(())
            }
            _ => Err(QuickPulseError::InvalidState(
                "no open object to end".to_string(),
            )),
        }
    }

    fn write_str(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        self.write_scalar(name, value.map(str::to_string))
    }

    fn write_i64(&mut self, name: &str, value: Option<i64>) -> Result<()> {
        self.write_scalar(name, value.map(|v| v.to_string()))
    }

    fn write_bool(&mut self, name: &str, value: Option<bool>) -> Result<()> {
        self.write_scalar(name, value.map(|v| v.to_string()))
    }

    // Scalar doubles stay properties; only dictionaries of doubles become
    // measurements.
    fn write_f64(&mut self, name: &str, value: Option<f64>) -> Result<()> {
        self.write_scalar(name, value.map(|v| v.to_string()))
    }

    fn write_duration(&mut self, name: &str, value: Option<Duration>) -> Result<()> {
        self.write_scalar(name, value.map(format_duration))
    }

    fn write_timestamp(&mut self, name: &str, value: Option<DateTime<Utc>>) -> Result<()> {
        self.write_scalar(name, value.map(format_timestamp))
    }

    fn write_object(&mut self, name: &str, value: Option<&dyn Serializable>) -> Result<()> {
        check_name(name)?;
        match value {
            Some(value) => {
                let prefix = self.key(name);
                self.with_prefix(prefix, value)
            }
            None => {
                self.write_null(name);
                Ok(())
            }
        }
    }

    // A generated key would not say which object is missing, so an absent
    // anonymous object leaves no entry.
    fn write_anonymous_object(&mut self, value: Option<&dyn Serializable>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        let prefix = self.next_sequential_key(DEFAULT_KEY);
        self.with_prefix(prefix, value)
    }

    fn write_str_list(&mut self, name: &str, items: Option<&[String]>) -> Result<()> {
        check_name(name)?;
        match items {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    let key = self.key(&format!("{name}{i}"));
                    self.insert_property(key, Some(item.clone()));
                }
            }
            None => self.write_null(name),
        }
        Ok(())
    }

    fn write_object_list(
        &mut self,
        name: &str,
        items: Option<&[&dyn Serializable]>,
    ) -> Result<()> {
        check_name(name)?;
        match items {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    let prefix = self.key(&format!("{name}{i}"));
                    self.with_prefix(prefix, *item)?;
                }
            }
            None => self.write_null(name),
        }
        Ok(())
    }

    fn write_str_map(
        &mut self,
        name: &str,
        values: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        check_name(name)?;
        match values {
            Some(values) => {
                for (field, value) in values {
                    let key = self.key(&format!("{name}.{field}"));
                    self.insert_property(key, Some(value.clone()));
                }
            }
            None => self.write_null(name),
        }
        Ok(())
    }

    fn write_f64_map(
        &mut self,
        name: &str,
        values: Option<&BTreeMap<String, f64>>,
    ) -> Result<()> {
        check_name(name)?;
        if let Some(values) = values {
            for (field, value) in values {
                let key = self.key(&format!("{name}.{field}"));
                self.measurements.entry(key).or_insert(*value);
            }
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(QuickPulseError::empty_name());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dependency {
        target: &'static str,
        success: Option<bool>,
    }

    impl Serializable for Dependency {
        fn serialize(&self, writer: &mut dyn SerializationWriter) -> Result<()> {
            writer.write_str("Target", Some(self.target))?;
            writer.write_bool("Success", self.success)
        }
    }

    #[test]
    fn test_first_write_wins() {
        let mut writer = DictionaryWriter::new();
        writer.write_str("A", Some("first")).unwrap();
        writer.write_str("A", Some("second")).unwrap();
        writer.write_i64("A", Some(3)).unwrap();
        assert_eq!(writer.property("A"), Some(Some("first")));
        assert_eq!(writer.properties().len(), 1);
    }

    #[test]
    fn test_null_placeholder_does_not_yield_to_later_value() {
        let mut writer = DictionaryWriter::new();
        writer.write_str("A", None).unwrap();
        writer.write_str("A", Some("late")).unwrap();
        assert_eq!(writer.property("A"), Some(None));
    }

    #[test]
    fn test_absent_nested_object_is_null_placeholder() {
        let mut writer = DictionaryWriter::new();
        writer.write_object("B", None).unwrap();
        assert_eq!(writer.property("B"), Some(None));
    }

    #[test]
    fn test_absent_nested_object_under_prefix() {
        let mut writer = DictionaryWriter::new();
        writer.write_start_object("Outer").unwrap();
        writer.write_object("Inner", None).unwrap();
        writer.write_end_object().unwrap();
        assert_eq!(writer.property("Outer.Inner"), Some(None));
        assert_eq!(writer.property("Outer.Outer.Inner"), None);
    }

    #[test]
    fn test_absent_lists_and_maps() {
        let mut writer = DictionaryWriter::new();
        writer.write_str_list("Tags", None).unwrap();
        writer.write_object_list("Children", None).unwrap();
        writer.write_str_map("Props", None).unwrap();
        writer.write_f64_map("Metrics", None).unwrap();
        assert_eq!(writer.property("Tags"), Some(None));
        assert_eq!(writer.property("Children"), Some(None));
        assert_eq!(writer.property("Props"), Some(None));
        assert_eq!(writer.property("Metrics"), None);
        assert!(writer.measurements().is_empty());
    }

    #[test]
    fn test_nested_object_keys() {
        let dep = Dependency {
            target: "sql",
            success: Some(true),
        };
        let mut writer = DictionaryWriter::new();
        writer.write_object("Dep", Some(&dep)).unwrap();
        assert_eq!(writer.property("Dep.Target"), Some(Some("sql")));
        assert_eq!(writer.property("Dep.Success"), Some(Some("true")));
    }

    #[test]
    fn test_anonymous_object_keys() {
        let mut writer = DictionaryWriter::new();
        writer.write_start_anonymous_object().unwrap();
        writer.write_str("Name", Some("one")).unwrap();
        writer.write_end_object().unwrap();
        writer.write_start_anonymous_object().unwrap();
        writer.write_str("Name", Some("two")).unwrap();
        writer.write_start_anonymous_object().unwrap();
        writer.write_str("Name", Some("nested")).unwrap();
        writer.write_end_object().unwrap();
        writer.write_end_object().unwrap();

        assert_eq!(writer.property("Obj1.Name"), Some(Some("one")));
        assert_eq!(writer.property("Obj2.Name"), Some(Some("two")));
        assert_eq!(writer.property("Obj2.Obj1.Name"), Some(Some("nested")));
    }

    #[test]
    fn test_anonymous_values_use_key_prefix() {
        let a = Dependency {
            target: "a",
            success: None,
        };
        let b = Dependency {
            target: "b",
            success: None,
        };
        let mut writer = DictionaryWriter::new();
        writer.write_anonymous_object(Some(&a)).unwrap();
        writer.write_anonymous_object(None).unwrap();
        writer.write_anonymous_object(Some(&b)).unwrap();

        assert_eq!(writer.property("Key1.Target"), Some(Some("a")));
        assert_eq!(writer.property("Key1.Success"), Some(None));
        assert_eq!(writer.property("Key2.Target"), Some(Some("b")));
    }

    #[test]
    fn test_lists() {
        let a = Dependency {
            target: "a",
            success: Some(false),
        };
        let b = Dependency {
            target: "b",
            success: Some(true),
        };
        let tags = vec!["x".to_string(), "y".to_string()];
        let mut writer = DictionaryWriter::new();
        writer.write_str_list("Tag", Some(tags.as_slice())).unwrap();
        writer
            .write_object_list("Dep", Some(&[&a as &dyn Serializable, &b][..]))
            .unwrap();

        assert_eq!(writer.property("Tag0"), Some(Some("x")));
        assert_eq!(writer.property("Tag1"), Some(Some("y")));
        assert_eq!(writer.property("Dep0.Target"), Some(Some("a")));
        assert_eq!(writer.property("Dep1.Success"), Some(Some("true")));
    }

    #[test]
    fn test_maps_split_properties_and_measurements() {
        let mut props = BTreeMap::new();
        props.insert("region".to_string(), "eu".to_string());
        let mut metrics = BTreeMap::new();
        metrics.insert("cpu".to_string(), 0.25);

        let mut writer = DictionaryWriter::new();
        writer.write_str_map("Props", Some(&props)).unwrap();
        writer.write_f64_map("Metrics", Some(&metrics)).unwrap();

        let mut later = BTreeMap::new();
        later.insert("cpu".to_string(), 0.99);
        writer.write_f64_map("Metrics", Some(&later)).unwrap();

        assert_eq!(writer.property("Props.region"), Some(Some("eu")));
        assert_eq!(writer.measurement("Metrics.cpu"), Some(0.25));
        assert_eq!(writer.property("Metrics.cpu"), None);
    }

    #[test]
    fn test_scalar_double_is_property() {
        let mut writer = DictionaryWriter::new();
        writer.write_f64("Ratio", Some(0.5)).unwrap();
        writer.write_f64("Missing", None).unwrap();
        assert_eq!(writer.property("Ratio"), Some(Some("0.5")));
        assert_eq!(writer.property("Missing"), Some(None));
        assert!(writer.measurements().is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut writer = DictionaryWriter::new();
        for result in [
            writer.write_str("", Some("x")),
            writer.write_f64("", None),
            writer.write_start_object(""),
            writer.write_object("", None),
            writer.write_str_list("", None),
            writer.write_f64_map("", None),
        ] {
            assert!(matches!(result, Err(QuickPulseError::InvalidArgument(_))));
        }
        assert!(writer.properties().is_empty());
    }

    #[test]
    fn test_end_without_start() {
        let mut writer = DictionaryWriter::new();
        assert!(matches!(
            writer.write_end_object(),
            Err(QuickPulseError::InvalidState(_))
        ));
    }

    #[test]
    fn test_to_json() {
        let mut writer = DictionaryWriter::new();
        writer.write_str("Name", Some("n")).unwrap();
        writer.write_object("Gone", None).unwrap();
        let mut metrics = BTreeMap::new();
        metrics.insert("m".to_string(), 1.5);
        writer.write_f64_map("M", Some(&metrics)).unwrap();

        let json = writer.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"properties":{"Gone":null,"Name":"n"},"measurements":{"M.m":1.5}}"#
        );
    }
}
