//! Typed option values and the coercion rules applied to raw source input.
//!
//! Sources either hand over values that already carry a type (TOML documents,
//! in-memory maps) or plain text (environment variables, command-line
//! overrides). The resolver coerces both into an [`OptionValue`] matching the
//! declared [`OptionType`] of the owning schema.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Declared type of a configuration option.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OptionType {
    /// `true` or `false`.
    Bool,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit floating point number.
    Float,
    /// UTF-8 text.
    Text,
}

/// A configuration value conforming to an [`OptionType`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl OptionValue {
    /// Returns the type carried by this value.
    #[must_use]
    pub const fn option_type(&self) -> OptionType {
        match self {
            Self::Bool(_) => OptionType::Bool,
            Self::Integer(_) => OptionType::Integer,
            Self::Float(_) => OptionType::Float,
            Self::Text(_) => OptionType::Text,
        }
    }

    /// Returns the boolean payload, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the float payload, if any.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Converts the value to the declared type.
    ///
    /// Integers widen to floats; every other mismatch is refused.
    #[must_use]
    pub fn conform_to(self, expected: OptionType) -> Option<Self> {
        match (self, expected) {
            (value, ty) if value.option_type() == ty => Some(value),
            #[expect(
                clippy::cast_precision_loss,
                reason = "widening integers declared as floats is part of the schema contract"
            )]
            (Self::Integer(value), OptionType::Float) => Some(Self::Float(value as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(formatter, "{value}"),
            Self::Integer(value) => write!(formatter, "{value}"),
            Self::Float(value) => write!(formatter, "{value}"),
            Self::Text(value) => formatter.write_str(value),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Value as handed over by a source, before schema coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Value that already carries a type.
    Typed(OptionValue),
    /// Plain text to be parsed according to the declared type.
    Text(String),
}

impl RawValue {
    /// Coerces the raw input into the declared type.
    ///
    /// Returns `None` when the input cannot represent a value of that type.
    #[must_use]
    pub fn coerce(self, expected: OptionType) -> Option<OptionValue> {
        match self {
            Self::Typed(value) => value.conform_to(expected),
            Self::Text(text) => parse_text(&text, expected),
        }
    }

    /// Short human-readable rendering used in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Typed(value) => format!("{value} ({})", value.option_type()),
            Self::Text(text) => format!("'{text}'"),
        }
    }
}

impl From<OptionValue> for RawValue {
    fn from(value: OptionValue) -> Self {
        Self::Typed(value)
    }
}

fn parse_text(text: &str, expected: OptionType) -> Option<OptionValue> {
    let trimmed = text.trim();
    match expected {
        OptionType::Bool => parse_bool(trimmed).map(OptionValue::Bool),
        OptionType::Integer => trimmed.parse::<i64>().ok().map(OptionValue::Integer),
        OptionType::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(OptionValue::Float),
        OptionType::Text => Some(OptionValue::Text(text.to_owned())),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::yes("yes", true)]
    #[case::upper("TRUE", true)]
    #[case::one("1", true)]
    #[case::off("off", false)]
    #[case::zero(" 0 ", false)]
    fn parses_boolean_spellings(#[case] input: &str, #[case] expected: bool) {
        let value = RawValue::Text(input.to_owned()).coerce(OptionType::Bool);
        assert_eq!(value, Some(OptionValue::Bool(expected)));
    }

    #[rstest]
    #[case::integer_from_words("twelve", OptionType::Integer)]
    #[case::bool_from_words("maybe", OptionType::Bool)]
    #[case::float_nan("NaN", OptionType::Float)]
    fn rejects_unparseable_text(#[case] input: &str, #[case] expected: OptionType) {
        assert!(RawValue::Text(input.to_owned()).coerce(expected).is_none());
    }

    #[test]
    fn integers_widen_to_floats() {
        let value = RawValue::Typed(OptionValue::Integer(3)).coerce(OptionType::Float);
        assert_eq!(value, Some(OptionValue::Float(3.0)));
    }

    #[test]
    fn typed_values_do_not_narrow() {
        let value = RawValue::Typed(OptionValue::Float(3.5)).coerce(OptionType::Integer);
        assert!(value.is_none());
        let text = RawValue::Typed(OptionValue::Integer(7)).coerce(OptionType::Text);
        assert!(text.is_none());
    }

    #[test]
    fn text_is_kept_verbatim() {
        let value = RawValue::Text("  padded ".to_owned()).coerce(OptionType::Text);
        assert_eq!(value, Some(OptionValue::Text("  padded ".to_owned())));
    }
}
