//! Bidirectional wire-line ↔ property translation.
//!
//! A translation table is built once per device type and answers two
//! questions: "this line arrived from the device, which properties changed
//! and to what?" and "this property should become this value, what command
//! does that take?". Registration is explicit: a driver lists its rules in
//! a [`TableBuilder`], most specific first, and registering the same decode
//! pattern or the same encode property again replaces the earlier rule.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use seriot_core::PropertyValue;

/// Decode handler: `(property, captured_text) -> value`.
///
/// Called once per capture group with that group's text. A failure means
/// "this group's value is unrecognized, ignore it"; other groups from the
/// same line still apply.
pub type DecodeFn = dyn Fn(&str, &str) -> Result<PropertyValue, TranslateError> + Send + Sync;

/// Encode handler: `(new_value) -> formatted command argument`.
///
/// A failure means "do not send anything, leave device state unchanged".
pub type EncodeFn = dyn Fn(&PropertyValue) -> Result<String, TranslateError> + Send + Sync;

/// Errors raised while building or applying translation rules.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// A decode pattern failed to compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A decode rule binds a different number of properties than its
    /// pattern has capture groups.
    #[error("pattern {pattern:?} has {groups} capture groups but {properties} bound properties")]
    GroupMismatch {
        pattern: String,
        groups: usize,
        properties: usize,
    },

    /// The device sent text a handler does not recognize.
    #[error("{text:?} is not a valid value for property {property}")]
    InvalidText { property: String, text: String },

    /// An update requested a value the device cannot take.
    #[error("{value} is not a valid value for property {property}")]
    UnsupportedValue {
        property: String,
        value: PropertyValue,
    },
}

impl TranslateError {
    /// Shorthand for decode handlers rejecting captured text.
    pub fn invalid_text(property: &str, text: &str) -> Self {
        Self::InvalidText {
            property: property.to_string(),
            text: text.to_string(),
        }
    }

    /// Shorthand for encode handlers rejecting a requested value.
    pub fn unsupported(property: &str, value: &PropertyValue) -> Self {
        Self::UnsupportedValue {
            property: property.to_string(),
            value: value.clone(),
        }
    }
}

struct DecodeRule {
    pattern: Regex,
    properties: Vec<String>,
    handler: Arc<DecodeFn>,
}

struct EncodeRule {
    template: String,
    handler: Arc<EncodeFn>,
}

/// Registers translation rules for one device type.
pub struct TableBuilder {
    decode: Vec<(String, Vec<String>, Arc<DecodeFn>)>,
    encode: Vec<(String, String, Arc<EncodeFn>)>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self {
            decode: Vec::new(),
            encode: Vec::new(),
        }
    }

    /// Register a device-to-property rule with a single capture group.
    pub fn decode(
        self,
        property: &str,
        pattern: &str,
        handler: impl Fn(&str, &str) -> Result<PropertyValue, TranslateError> + Send + Sync + 'static,
    ) -> Self {
        self.decode_many(&[property], pattern, handler)
    }

    /// Register a device-to-property rule updating several properties from
    /// one line, one capture group per property in order.
    pub fn decode_many(
        mut self,
        properties: &[&str],
        pattern: &str,
        handler: impl Fn(&str, &str) -> Result<PropertyValue, TranslateError> + Send + Sync + 'static,
    ) -> Self {
        let names: Vec<String> = properties.iter().map(|p| p.to_string()).collect();
        let handler: Arc<DecodeFn> = Arc::new(handler);
        // same pattern replaces the earlier rule in place
        match self.decode.iter().position(|(p, _, _)| p == pattern) {
            Some(at) => self.decode[at] = (pattern.to_string(), names, handler),
            None => self.decode.push((pattern.to_string(), names, handler)),
        }
        self
    }

    /// Register a property-to-device rule. `template` contains one `{}`
    /// placeholder that receives the handler's output.
    pub fn encode(
        mut self,
        property: &str,
        template: &str,
        handler: impl Fn(&PropertyValue) -> Result<String, TranslateError> + Send + Sync + 'static,
    ) -> Self {
        let handler: Arc<EncodeFn> = Arc::new(handler);
        match self.encode.iter().position(|(p, _, _)| p == property) {
            Some(at) => self.encode[at] = (property.to_string(), template.to_string(), handler),
            None => self
                .encode
                .push((property.to_string(), template.to_string(), handler)),
        }
        self
    }

    /// Compile the registered rules.
    ///
    /// Properties covered in only one direction are legal (read-only or
    /// write-only) but logged, since most properties want both rules.
    pub fn build(self) -> Result<TranslationTable, TranslateError> {
        let mut decode = Vec::with_capacity(self.decode.len());
        for (pattern, properties, handler) in self.decode {
            let compiled = Regex::new(&pattern).map_err(|source| TranslateError::BadPattern {
                pattern: pattern.clone(),
                source,
            })?;
            let groups = compiled.captures_len() - 1;
            if groups != properties.len() {
                return Err(TranslateError::GroupMismatch {
                    pattern,
                    groups,
                    properties: properties.len(),
                });
            }
            decode.push(DecodeRule {
                pattern: compiled,
                properties,
                handler,
            });
        }

        let mut encode = HashMap::new();
        for (property, template, handler) in self.encode {
            encode.insert(property, EncodeRule { template, handler });
        }

        let table = TranslationTable { decode, encode };
        for property in table.decode_properties() {
            if !table.encode.contains_key(&property) {
                warn!(%property, "no encode rule for property; it is read-only");
            }
        }
        for property in table.encode.keys() {
            if !table.decode_properties().contains(property) {
                warn!(%property, "no decode rule for property; it is write-only");
            }
        }
        Ok(table)
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiled translation rules for one device type.
pub struct TranslationTable {
    decode: Vec<DecodeRule>,
    encode: HashMap<String, EncodeRule>,
}

impl TranslationTable {
    pub fn builder() -> TableBuilder {
        TableBuilder::new()
    }

    /// Every property named by any rule, sorted. Components seed their
    /// cache from this with `Unknown` values.
    pub fn properties(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .decode_properties()
            .into_iter()
            .chain(self.encode.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn decode_properties(&self) -> Vec<String> {
        self.decode
            .iter()
            .flat_map(|rule| rule.properties.iter().cloned())
            .collect()
    }

    /// Decode one raw device line into property updates.
    ///
    /// Rules are tried in registration order and the first whole-line match
    /// wins. Each capture group is handed to the rule's handler with its
    /// bound property; a handler failure drops that one group and keeps the
    /// rest. A line matching no rule decodes to nothing.
    pub fn decode_line(&self, line: &str) -> Vec<(String, PropertyValue)> {
        for rule in &self.decode {
            let Some(captures) = rule.pattern.captures(line) else {
                continue;
            };
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if whole.start() != 0 || whole.end() != line.len() {
                continue;
            }

            let mut updates = Vec::with_capacity(rule.properties.len());
            for (i, property) in rule.properties.iter().enumerate() {
                let Some(group) = captures.get(i + 1) else {
                    continue;
                };
                match (rule.handler)(property, group.as_str()) {
                    Ok(value) => updates.push((property.clone(), value)),
                    Err(err) => {
                        warn!(%property, error = %err, "unable to process device response")
                    }
                }
            }
            return updates;
        }
        Vec::new()
    }

    /// Format the command that drives `property` to `value`.
    ///
    /// `Ok(None)` means no rule covers the property; the caller decides
    /// whether that is worth a warning. A handler error means the requested
    /// value is unsupported and nothing should be sent.
    pub fn encode(
        &self,
        property: &str,
        value: &PropertyValue,
    ) -> Result<Option<String>, TranslateError> {
        let Some(rule) = self.encode.get(property) else {
            return Ok(None);
        };
        let argument = (rule.handler)(value)?;
        Ok(Some(rule.template.replacen("{}", &argument, 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power_table() -> TranslationTable {
        TranslationTable::builder()
            .decode("powerState", "^P1P([01])$", |property, text| match text {
                "1" => Ok("ON".into()),
                "0" => Ok("OFF".into()),
                _ => Err(TranslateError::invalid_text(property, text)),
            })
            .encode("powerState", "P1P{}", |value| match value.as_str() {
                Some("ON") => Ok("1".to_string()),
                Some("OFF") => Ok("0".to_string()),
                _ => Err(TranslateError::unsupported("powerState", value)),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_decode_exact_line() {
        let table = power_table();
        assert_eq!(
            table.decode_line("P1P1"),
            vec![("powerState".to_string(), "ON".into())]
        );
        assert_eq!(
            table.decode_line("P1P0"),
            vec![("powerState".to_string(), "OFF".into())]
        );
    }

    #[test]
    fn test_non_matching_line_is_inert() {
        let table = power_table();
        assert!(table.decode_line("P1P2").is_empty());
        assert!(table.decode_line("garbage").is_empty());
        assert!(table.decode_line("").is_empty());
    }

    #[test]
    fn test_match_must_cover_whole_line() {
        // an unanchored pattern must still not fire on a partial match
        let table = TranslationTable::builder()
            .decode("powerState", "P1P([01])", |_, text| {
                Ok(if text == "1" { "ON" } else { "OFF" }.into())
            })
            .build()
            .unwrap();
        assert_eq!(table.decode_line("P1P1").len(), 1);
        assert!(table.decode_line("P1P1X").is_empty());
        assert!(table.decode_line("XP1P1").is_empty());
    }

    #[test]
    fn test_multi_group_rule_yields_independent_updates() {
        let table = TranslationTable::builder()
            .decode_many(
                &["input", "muted"],
                "^P1S([0-9])M([01])$",
                |property, text| match property {
                    "input" => match text {
                        "6" => Ok("TV".into()),
                        "9" => Ok("AUX".into()),
                        _ => Err(TranslateError::invalid_text(property, text)),
                    },
                    "muted" => Ok((text == "1").into()),
                    _ => Err(TranslateError::invalid_text(property, text)),
                },
            )
            .build()
            .unwrap();

        let updates = table.decode_line("P1S6M1");
        assert_eq!(
            updates,
            vec![
                ("input".to_string(), "TV".into()),
                ("muted".to_string(), true.into()),
            ]
        );
    }

    #[test]
    fn test_failed_group_keeps_the_rest() {
        let table = TranslationTable::builder()
            .decode_many(
                &["input", "muted"],
                "^P1S([0-9])M([01])$",
                |property, text| match property {
                    "input" => match text {
                        "6" => Ok("TV".into()),
                        _ => Err(TranslateError::invalid_text(property, text)),
                    },
                    _ => Ok((text == "1").into()),
                },
            )
            .build()
            .unwrap();

        // input "4" is unmapped; muted still decodes
        let updates = table.decode_line("P1S4M0");
        assert_eq!(updates, vec![("muted".to_string(), false.into())]);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let table = TranslationTable::builder()
            .decode("specific", "^A([0-9])$", |_, _| Ok("specific".into()))
            .decode("generic", "^A(.)$", |_, _| Ok("generic".into()))
            .build()
            .unwrap();

        let updates = table.decode_line("A7");
        assert_eq!(updates[0].0, "specific");
    }

    #[test]
    fn test_same_pattern_replaces_in_place() {
        // a derived driver overriding an inherited rule keeps its position
        let table = TranslationTable::builder()
            .decode("powerState", "^P1P([01])$", |_, _| Ok("base".into()))
            .decode("powerState", "^P1P([01])$", |_, _| Ok("derived".into()))
            .build()
            .unwrap();

        let updates = table.decode_line("P1P1");
        assert_eq!(updates, vec![("powerState".to_string(), "derived".into())]);
    }

    #[test]
    fn test_encode_formats_template() {
        let table = power_table();
        assert_eq!(
            table.encode("powerState", &"OFF".into()).unwrap(),
            Some("P1P0".to_string())
        );
        assert_eq!(
            table.encode("powerState", &"ON".into()).unwrap(),
            Some("P1P1".to_string())
        );
    }

    #[test]
    fn test_encode_invalid_value_sends_nothing() {
        let table = power_table();
        let err = table.encode("powerState", &"BLUE".into()).unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedValue { .. }));
    }

    #[test]
    fn test_encode_unknown_property_is_none() {
        let table = power_table();
        assert_eq!(table.encode("volume", &PropertyValue::Int(50)).unwrap(), None);
    }

    #[test]
    fn test_encode_replacement_last_wins() {
        let table = TranslationTable::builder()
            .decode("powerState", "^P([01])$", |_, text| {
                Ok(if text == "1" { "ON" } else { "OFF" }.into())
            })
            .encode("powerState", "P{}", |_| Ok("base".to_string()))
            .encode("powerState", "POWER {}", |_| Ok("derived".to_string()))
            .build()
            .unwrap();
        assert_eq!(
            table.encode("powerState", &"ON".into()).unwrap(),
            Some("POWER derived".to_string())
        );
    }

    #[test]
    fn test_bad_pattern_rejected_at_build() {
        let err = TranslationTable::builder()
            .decode("x", "([", |_, _| Ok(PropertyValue::Unknown))
            .build()
            .unwrap_err();
        assert!(matches!(err, TranslateError::BadPattern { .. }));
    }

    #[test]
    fn test_group_arity_checked_at_build() {
        let err = TranslationTable::builder()
            .decode_many(&["a", "b"], "^X([0-9])$", |_, _| Ok(PropertyValue::Unknown))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            TranslateError::GroupMismatch {
                groups: 1,
                properties: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_one_direction_properties_allowed() {
        // read-only and write-only properties build fine (they only warn)
        let table = TranslationTable::builder()
            .decode("signalLock", "^LOCK([01])$", |_, text| {
                Ok((text == "1").into())
            })
            .encode("reset", "RST {}", |_| Ok("NOW".to_string()))
            .build()
            .unwrap();
        assert_eq!(table.properties(), vec!["reset", "signalLock"]);
    }

    #[test]
    fn test_round_trip_symmetric_protocol() {
        let table = power_table();
        let command = table.encode("powerState", &"OFF".into()).unwrap().unwrap();
        // a symmetric device acknowledges the command by echoing the state
        let updates = table.decode_line(&command);
        assert_eq!(updates, vec![("powerState".to_string(), "OFF".into())]);
    }
}
