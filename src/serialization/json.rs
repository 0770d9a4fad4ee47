//! Nested JSON encoder.
//!
//! [`JsonWriter`] streams a compact JSON document into a `String`. It never
//! writes `null`: absent values, empty strings, empty lists and empty maps
//! are left out, and so are non-finite doubles, which JSON cannot represent.
//! Commas are tracked per nesting level, so skipping a property never leaves
//! a dangling separator behind.
//!
//! # Examples
//!
//! ```rust
//! use quickpulse::serialization::json::JsonWriter;
//! use quickpulse::serialization::SerializationWriter;
//!
//! let mut writer = JsonWriter::new();
//! writer.write_start_anonymous_object().unwrap();
//! writer.write_str("Name", Some("checkout")).unwrap();
//! writer.write_str("Missing", None).unwrap();
//! writer.write_i64("Count", Some(3)).unwrap();
//! writer.write_end_object().unwrap();
//!
//! assert_eq!(writer.finish().unwrap(), r#"{"Name":"checkout","Count":3}"#);
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{QuickPulseError, Result};
use crate::serialization::{format_duration, format_timestamp, Serializable, SerializationWriter};

#[derive(Debug, Clone, Copy)]
enum Frame {
    Object { has_properties: bool },
    Array { has_items: bool },
}

/// Writes a nested JSON document.
#[derive(Debug, Default)]
pub struct JsonWriter {
    out: String,
    frames: Vec<Frame>,
}

impl JsonWriter {
    /// Creates an empty writer. The first call is expected to open the root
    /// object with [`write_start_anonymous_object`](SerializationWriter::write_start_anonymous_object).
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes `value` as a standalone JSON object.
    pub fn to_json(value: &dyn Serializable) -> Result<String> {
        let mut writer = JsonWriter::new();
        writer.write_anonymous_object(Some(value))?;
        writer.finish()
    }

    /// Serializes `items` as a JSON array of objects.
    pub fn to_json_array(items: &[&dyn Serializable]) -> Result<String> {
        let mut writer = JsonWriter::new();
        writer.out.push('[');
        writer.frames.push(Frame::Array { has_items: false });
        for item in items {
            writer.write_anonymous_object(Some(*item))?;
        }
        writer.frames.pop();
        writer.out.push(']');
        writer.finish()
    }

    /// Returns the text written so far.
    pub fn as_str(&self) -> &str {
        &self.out
    }

    /// Returns the finished document.
    ///
    /// Fails with [`QuickPulseError::InvalidState`] if an object is still
    /// open.
    pub fn finish(self) -> Result<String> {
        if !self.frames.is_empty() {
            return Err(QuickPulseError::InvalidState(format!(
                "{} object(s) left open",
                self.frames.len()
            )));
        }
        Ok(self.out)
    }

    fn write_property_name(&mut self, name: &str) -> Result<()> {
        check_name(name)?;
        match self.frames.last_mut() {
            Some(Frame::Object { has_properties }) => {
                if *has_properties {
                    self.out.push(',');
                } else {
                    *has_properties = true;
                }
            }
            Some(Frame::Array { .. }) | None => {
                return Err(QuickPulseError::InvalidState(format!(
                    "property '{name}' written outside of an object"
                )));
            }
        }
        write_string(&mut self.out, name);
        self.out.push(':');
        Ok(())
    }

    fn begin_anonymous_value(&mut self) -> Result<()> {
        match self.frames.last_mut() {
            Some(Frame::Array { has_items }) => {
                if *has_items {
                    self.out.push(',');
                } else {
                    *has_items = true;
                }
                Ok(())
            }
            Some(Frame::Object { .. }) => Err(QuickPulseError::InvalidState(
                "an object nested inside an object needs a name".to_string(),
            )),
            None if self.out.is_empty() => Ok(()),
            None => Err(QuickPulseError::InvalidState(
                "document already has a root value".to_string(),
            )),
        }
    }

    fn write_raw_property(&mut self, name: &str, raw: &str) -> Result<()> {
        self.write_property_name(name)?;
        self.out.push_str(raw);
        Ok(())
    }
}

impl SerializationWriter for JsonWriter {
    fn write_start_object(&mut self, name: &str) -> Result<()> {
        self.write_property_name(name)?;
        self.out.push('{');
        self.frames.push(Frame::Object {
            has_properties: false,
        });
        Ok(())
    }

    fn write_start_anonymous_object(&mut self) -> Result<()> {
        self.begin_anonymous_value()?;
        self.out.push('{');
        self.frames.push(Frame::Object {
            has_properties: false,
        });
        Ok(())
    }

    fn write_end_object(&mut self) -> Result<()> {
        match self.frames.pop() {
            Some(Frame::Object { .. }) => {
                self.out.push('}');
                Ok(())
            }
            Some(frame) => {
                self.frames.push(frame);
                Err(QuickPulseError::InvalidState(
                    "innermost open value is a list, not an object".to_string(),
                ))
            }
            None => Err(QuickPulseError::InvalidState(
                "no open object to end".to_string(),
            )),
        }
    }

    fn write_str(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        check_name(name)?;
        match value {
            Some(value) if !value.is_empty() => {
                self.write_property_name(name)?;
                write_string(&mut self.out, value);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn write_i64(&mut self, name: &str, value: Option<i64>) -> Result<()> {
        check_name(name)?;
        match value {
            Some(value) => self.write_raw_property(name, &value.to_string()),
            None => Ok(()),
        }
    }

    fn write_bool(&mut self, name: &str, value: Option<bool>) -> Result<()> {
        check_name(name)?;
        match value {
            Some(value) => self.write_raw_property(name, if value { "true" } else { "false" }),
            None => Ok(()),
        }
    }

    fn write_f64(&mut self, name: &str, value: Option<f64>) -> Result<()> {
        check_name(name)?;
        match value {
            Some(value) if value.is_finite() => self.write_raw_property(name, &value.to_string()),
            _ => Ok(()),
        }
    }

    fn write_duration(&mut self, name: &str, value: Option<Duration>) -> Result<()> {
        let formatted = value.map(format_duration);
        self.write_str(name, formatted.as_deref())
    }

    fn write_timestamp(&mut self, name: &str, value: Option<DateTime<Utc>>) -> Result<()> {
        let formatted = value.map(format_timestamp);
        self.write_str(name, formatted.as_deref())
    }

    fn write_object(&mut self, name: &str, value: Option<&dyn Serializable>) -> Result<()> {
        check_name(name)?;
        let Some(value) = value else {
            return Ok(());
        };
        self.write_start_object(name)?;
        value.serialize(self)?;
        self.write_end_object()
    }

    fn write_anonymous_object(&mut self, value: Option<&dyn Serializable>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        self.write_start_anonymous_object()?;
        value.serialize(self)?;
        self.write_end_object()
    }

    fn write_str_list(&mut self, name: &str, items: Option<&[String]>) -> Result<()> {
        check_name(name)?;
        let Some(items) = items.filter(|items| !items.is_empty()) else {
            return Ok(());
        };
        self.write_property_name(name)?;
        self.out.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push(',');
            }
            write_string(&mut self.out, item);
        }
        self.out.push(']');
        Ok(())
    }

    fn write_object_list(
        &mut self,
        name: &str,
        items: Option<&[&dyn Serializable]>,
    ) -> Result<()> {
        check_name(name)?;
        let Some(items) = items.filter(|items| !items.is_empty()) else {
            return Ok(());
        };
        self.write_property_name(name)?;
        self.out.push('[');
        self.frames.push(Frame::Array { has_items: false });
        for item in items {
            self.write_anonymous_object(Some(*item))?;
        }
        self.frames.pop();
        self.out.push(']');
        Ok(())
    }

    fn write_str_map(
        &mut self,
        name: &str,
        values: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        check_name(name)?;
        let Some(values) = values.filter(|values| !values.is_empty()) else {
            return Ok(());
        };
        self.write_start_object(name)?;
        for (key, value) in values {
            self.write_str(key, Some(value.as_str()))?;
        }
        self.write_end_object()
    }

    fn write_f64_map(
        &mut self,
        name: &str,
        values: Option<&BTreeMap<String, f64>>,
    ) -> Result<()> {
        check_name(name)?;
        let Some(values) = values.filter(|values| !values.is_empty()) else {
            return Ok(());
        };
        self.write_start_object(name)?;
        for (key, value) in values {
            self.write_f64(key, Some(*value))?;
        }
        self.write_end_object()
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(QuickPulseError::empty_name());
    }
    Ok(())
}

/// Appends `value` as a quoted JSON string.
fn write_string(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Span {
        name: &'static str,
        duration: Option<Duration>,
        tags: Vec<String>,
    }

    impl Serializable for Span {
        fn serialize(&self, writer: &mut dyn SerializationWriter) -> Result<()> {
            writer.write_str("Name", Some(self.name))?;
            writer.write_duration("Duration", self.duration)?;
            writer.write_str_list("Tags", Some(self.tags.as_slice()))
        }
    }

    fn object(build: impl FnOnce(&mut JsonWriter) -> Result<()>) -> String {
        let mut writer = JsonWriter::new();
        writer.write_start_anonymous_object().unwrap();
        build(&mut writer).unwrap();
        writer.write_end_object().unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_empty_object() {
        assert_eq!(object(|_| Ok(())), "{}");
    }

    #[test]
    fn test_escapes_quote_backslash_newline() {
        let json = object(|w| w.write_str("Message", Some("say \"hi\"\\\n")));
        assert_eq!(json, r#"{"Message":"say \"hi\"\\\n"}"#);
    }

    #[test]
    fn test_escapes_remaining_control_characters() {
        let json = object(|w| w.write_str("Raw", Some("\u{8}\u{c}\r\t\u{1}\u{1f}")));
        assert_eq!(json, r#"{"Raw":"\b\f\r\t\u0001\u001f"}"#);
    }

    #[test]
    fn test_escapes_property_names() {
        let json = object(|w| w.write_i64("a\"b", Some(1)));
        assert_eq!(json, r#"{"a\"b":1}"#);
    }

    #[test]
    fn test_absent_values_leave_no_commas() {
        let json = object(|w| {
            w.write_str("First", None)?;
            w.write_i64("Second", Some(2))?;
            w.write_bool("Third", None)?;
            w.write_f64("Fourth", None)?;
            w.write_str("Fifth", Some(""))?;
            w.write_bool("Sixth", Some(false))?;
            w.write_object("Seventh", None)?;
            w.write_str_list("Eighth", Some(Vec::<String>::new().as_slice()))
        });
        assert_eq!(json, r#"{"Second":2,"Sixth":false}"#);
    }

    #[test]
    fn test_non_finite_double_is_omitted() {
        let json = object(|w| {
            w.write_f64("Nan", Some(f64::NAN))?;
            w.write_f64("Value", Some(2.5))
        });
        assert_eq!(json, r#"{"Value":2.5}"#);
    }

    #[test]
    fn test_nested_objects_and_lists() {
        let span = Span {
            name: "db",
            duration: Some(Duration::from_millis(1500)),
            tags: vec!["sql".to_string(), "primary".to_string()],
        };
        let other = Span {
            name: "cache",
            duration: None,
            tags: vec![],
        };
        let json = object(|w| {
            w.write_object("Root", Some(&span))?;
            w.write_object_list("Children", Some(&[&span as &dyn Serializable, &other][..]))
        });
        assert_eq!(
            json,
            concat!(
                r#"{"Root":{"Name":"db","Duration":"00:00:01.5000000","Tags":["sql","primary"]},"#,
                r#""Children":[{"Name":"db","Duration":"00:00:01.5000000","Tags":["sql","primary"]},"#,
                r#"{"Name":"cache"}]}"#
            )
        );
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["Children"][1]["Name"], "cache");
    }

    #[test]
    fn test_maps() {
        let mut props = BTreeMap::new();
        props.insert("region".to_string(), "eu".to_string());
        let mut metrics = BTreeMap::new();
        metrics.insert("cpu".to_string(), 0.5);
        let json = object(|w| {
            w.write_str_map("Properties", Some(&props))?;
            w.write_f64_map("Metrics", Some(&metrics))?;
            w.write_f64_map("Empty", Some(&BTreeMap::new()))
        });
        assert_eq!(json, r#"{"Properties":{"region":"eu"},"Metrics":{"cpu":0.5}}"#);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut writer = JsonWriter::new();
        writer.write_start_anonymous_object().unwrap();
        assert!(matches!(
            writer.write_str("", Some("x")),
            Err(QuickPulseError::InvalidArgument(_))
        ));
        assert!(matches!(
            writer.write_i64("", None),
            Err(QuickPulseError::InvalidArgument(_))
        ));
        assert!(matches!(
            writer.write_start_object(""),
            Err(QuickPulseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unbalanced_objects() {
        let mut writer = JsonWriter::new();
        assert!(matches!(
            writer.write_end_object(),
            Err(QuickPulseError::InvalidState(_))
        ));
        writer.write_start_anonymous_object().unwrap();
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_to_json_array() {
        let a = Span {
            name: "a",
            duration: None,
            tags: vec![],
        };
        let b = Span {
            name: "b",
            duration: None,
            tags: vec![],
        };
        let json = JsonWriter::to_json_array(&[&a, &b]).unwrap();
        assert_eq!(json, r#"[{"Name":"a"},{"Name":"b"}]"#);
        assert_eq!(JsonWriter::to_json_array(&[]).unwrap(), "[]");
    }
}
