//! Typed attribute values.
//!
//! The store keeps raw strings; everything that compares values (filters,
//! sorting, projection) goes through [`parse_value`] so the three agree on
//! what a stored value means.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::request::SortOrder;
use crate::taxonomy::AttributeType;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Enum(String),
    Reference(String),
}

impl TypedValue {
    fn rank(&self) -> u8 {
        match self {
            TypedValue::String(_) => 0,
            TypedValue::Long(_) => 1,
            TypedValue::Double(_) => 2,
            TypedValue::Boolean(_) => 3,
            TypedValue::Date(_) => 4,
            TypedValue::Enum(_) => 5,
            TypedValue::Reference(_) => 6,
        }
    }

    /// String content of string-like values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) | TypedValue::Enum(s) | TypedValue::Reference(s) => Some(s),
            _ => None,
        }
    }

    /// Total order within a type. Values of different types never meet in
    /// practice; they fall back to a fixed type order.
    pub fn compare(&self, other: &TypedValue) -> Ordering {
        use TypedValue::*;
        match (self, other) {
            (String(a), String(b)) | (Enum(a), Enum(b)) | (Reference(a), Reference(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Long(a), Double(b)) => (*a as f64).total_cmp(b),
            (Double(a), Long(b)) => a.total_cmp(&(*b as f64)),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Interpret a raw stored or user-supplied value. `None` when the text is not
/// a valid value of `attr_type`.
pub fn parse_value(attr_type: AttributeType, raw: &str) -> Option<TypedValue> {
    match attr_type {
        AttributeType::String => Some(TypedValue::String(raw.to_string())),
        AttributeType::Enum => Some(TypedValue::Enum(raw.to_string())),
        AttributeType::Reference => Some(TypedValue::Reference(raw.to_string())),
        AttributeType::Long => raw.trim().parse().ok().map(TypedValue::Long),
        AttributeType::Double => raw.trim().parse().ok().map(TypedValue::Double),
        AttributeType::Boolean => {
            let raw = raw.trim();
            if raw.eq_ignore_ascii_case("true") {
                Some(TypedValue::Boolean(true))
            } else if raw.eq_ignore_ascii_case("false") {
                Some(TypedValue::Boolean(false))
            } else {
                None
            }
        }
        AttributeType::Date => parse_date(raw.trim()).map(TypedValue::Date),
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Ordering of two sort keys. Missing values sort last in either direction.
pub fn compare_sort_keys(
    a: Option<&TypedValue>,
    b: Option<&TypedValue>,
    order: SortOrder,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match order {
            SortOrder::Ascending => a.compare(b),
            SortOrder::Descending => b.compare(a),
        },
    }
}
