//! # Type System for Path Parameters
//!
//! Typed captures for route placeholders.
//!
//! A placeholder such as `<int>` consumes exactly one path segment (or, for
//! `<path>`, the whole remainder of the path) and only matches when the
//! segment's lexical form is valid for the type. Numeric text that is well
//! formed but does not fit the target width is reported separately as
//! [`Capture::Overflow`] so the router can answer 400 instead of 404.

use crate::request::url_decode;
use std::fmt;

/// Supported path parameter types
///
/// Declared order is the matching priority among captures at one depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamType {
    /// Signed 64-bit integer (`<int>`)
    Int,
    /// Unsigned 64-bit integer (`<uint>`)
    Uint,
    /// 64-bit float (`<double>` / `<float>`)
    Double,
    /// Any non-empty segment (`<string>` / `<str>`)
    String,
    /// Remainder of the path including slashes (`<path>`)
    Path,
}

impl ParamType {
    /// Capture types in the order the router tries them
    pub const PRIORITY: [Self; 5] = [
        Self::Int,
        Self::Uint,
        Self::Double,
        Self::String,
        Self::Path,
    ];

    /// Parse a placeholder body (e.g. `int` from `<int>`)
    #[must_use]
    pub fn from_specifier(s: &str) -> Option<Self> {
        match s {
            "int" => Some(Self::Int),
            "uint" => Some(Self::Uint),
            "double" | "float" => Some(Self::Double),
            "string" | "str" => Some(Self::String),
            "path" => Some(Self::Path),
            _ => None,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Double => "double",
            Self::String => "string",
            Self::Path => "path",
        }
    }

    /// Try to capture `raw` as this type
    ///
    /// `raw` is a single segment, except for [`ParamType::Path`] where it is
    /// the rest of the request path.
    #[must_use]
    pub fn capture(self, raw: &str) -> Capture {
        if raw.is_empty() {
            return Capture::Rejected;
        }
        match self {
            Self::Int => capture_int(raw),
            Self::Uint => capture_uint(raw),
            Self::Double => capture_double(raw),
            Self::String | Self::Path => Capture::Matched(ParamValue::String(url_decode(raw, false))),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.type_name())
    }
}

/// Outcome of capturing one segment
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    /// Segment is valid for the type
    Matched(ParamValue),
    /// Segment is not of this type at all
    Rejected,
    /// Segment is well-formed numeric text outside the representable range
    Overflow,
}

fn capture_int(raw: &str) -> Capture {
    let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    if !all_digits(digits) {
        return Capture::Rejected;
    }
    raw.parse::<i64>()
        .map_or(Capture::Overflow, |v| Capture::Matched(ParamValue::Int(v)))
}

fn capture_uint(raw: &str) -> Capture {
    let digits = raw.strip_prefix('+').unwrap_or(raw);
    if !all_digits(digits) {
        return Capture::Rejected;
    }
    digits
        .parse::<u64>()
        .map_or(Capture::Overflow, |v| Capture::Matched(ParamValue::Uint(v)))
}

fn capture_double(raw: &str) -> Capture {
    let lexically_numeric = raw.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if !lexically_numeric {
        return Capture::Rejected;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_infinite() => Capture::Overflow,
        Ok(v) => Capture::Matched(ParamValue::Double(v)),
        Err(_) => Capture::Rejected,
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Converted parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    Uint(u64),
    /// Float
    Double(f64),
    /// Percent-decoded text (`<string>` and `<path>`)
    String(String),
}

impl ParamValue {
    /// Render the value back to text
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Uint(u) => u.to_string(),
            Self::Double(f) => f.to_string(),
            Self::String(s) => s.clone(),
        }
    }

    /// Get as i64 if Int variant
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as u64 if Uint variant
    #[must_use]
    pub const fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(u) => Some(*u),
            _ => None,
        }
    }

    /// Get as f64 if Double variant
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if String variant
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Ordered captured values of one matched route
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Vec<ParamValue>,
}

impl Params {
    /// Create from captured values in pattern order
    #[must_use]
    pub const fn new(values: Vec<ParamValue>) -> Self {
        Self { values }
    }

    /// Value at position `idx`
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&ParamValue> {
        self.values.get(idx)
    }

    /// Integer at position `idx`
    #[must_use]
    pub fn int(&self, idx: usize) -> Option<i64> {
        self.get(idx).and_then(ParamValue::as_int)
    }

    /// Unsigned integer at position `idx`
    #[must_use]
    pub fn uint(&self, idx: usize) -> Option<u64> {
        self.get(idx).and_then(ParamValue::as_uint)
    }

    /// Float at position `idx`
    #[must_use]
    pub fn float(&self, idx: usize) -> Option<f64> {
        self.get(idx).and_then(ParamValue::as_float)
    }

    /// Text at position `idx`
    #[must_use]
    pub fn str(&self, idx: usize) -> Option<&str> {
        self.get(idx).and_then(ParamValue::as_str)
    }

    /// Number of captures
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over captures in pattern order
    pub fn iter(&self) -> std::slice::Iter<'_, ParamValue> {
        self.values.iter()
    }

    /// Consume into the underlying values
    #[must_use]
    pub fn into_vec(self) -> Vec<ParamValue> {
        self.values
    }
}
