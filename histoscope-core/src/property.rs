//! Named subject properties.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Property key holding the user-chosen display limits as a data-space range.
pub const DISPLAY_LIMITS: &str = "display_limits";

/// Property key holding the subject's title.
pub const TITLE: &str = "title";

/// Value attached to a named property of a subject.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PropertyValue {
    /// Property unset or cleared.
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Closed interval `(low, high)`.
    Range(f64, f64),
}

impl PropertyValue {
    /// Returns true for [`PropertyValue::None`].
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, PropertyValue::None)
    }

    /// Returns the interval if this is a [`PropertyValue::Range`].
    #[must_use]
    pub fn as_range(&self) -> Option<(f64, f64)> {
        match *self {
            PropertyValue::Range(low, high) => Some((low, high)),
            _ => None,
        }
    }

    /// Returns the text if this is a [`PropertyValue::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<(f64, f64)> for PropertyValue {
    fn from((low, high): (f64, f64)) -> Self {
        PropertyValue::Range(low, high)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<Option<(f64, f64)>> for PropertyValue {
    fn from(value: Option<(f64, f64)>) -> Self {
        value.map_or(PropertyValue::None, PropertyValue::from)
    }
}
