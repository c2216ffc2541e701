//! Number-to-string typecasting of metadata trees
//!
//! Every numeric leaf is replaced by its string form and a [`TypecastRecord`] is emitted so
//! the ingestion side can cast the value back. Records come out in depth-first order:
//! object keys in insertion order, array elements by ascending index.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::trace;

use crate::types::log_event::METADATA_KEY;
use crate::types::LogEvent;

/// First segment of every record path produced for a log event
pub const ROOT_SEGMENT: &str = METADATA_KEY;

/// Representation named on either side of a typecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypecastKind {
    /// JSON string
    String,
    /// JSON number
    Float,
}

/// One rewritten leaf
///
/// `from`/`to` describe the cast the receiving side applies, so a number sent as a string
/// is recorded as `string -> float`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypecastRecord {
    /// Object keys from the root to the leaf; array indices are left out
    pub path: Vec<String>,
    /// Representation on the wire
    pub from: TypecastKind,
    /// Representation to restore
    pub to: TypecastKind,
}

/// Output of a typecasting pass
#[derive(Debug, Clone, PartialEq)]
pub struct Typecasted<T> {
    /// The rewritten value
    pub body: T,
    /// One record per rewritten leaf, in traversal order
    pub typecasts: Vec<TypecastRecord>,
}

/// The numeric representations the typecaster recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    /// Fits in `i64` or `u64`
    Integer,
    /// Value held exactly by an `f64`, whatever its spelling
    Float,
    /// Integral value wider than 64 bits
    BigInteger,
    /// Fractional value with more precision than `f64` holds
    Decimal,
}

impl NumericKind {
    /// Classify a JSON number by its value
    pub fn of(number: &Number) -> Self {
        if number.is_i64() || number.is_u64() {
            return NumericKind::Integer;
        }

        let Some(exact) = DecimalValue::parse(&number.to_string()) else {
            return NumericKind::Decimal;
        };

        let float = number
            .as_f64()
            .filter(|f| f.is_finite())
            .and_then(Number::from_f64)
            .and_then(|f| DecimalValue::parse(&f.to_string()));
        if float.as_ref() == Some(&exact) {
            NumericKind::Float
        } else if exact.is_integral() {
            NumericKind::BigInteger
        } else {
            NumericKind::Decimal
        }
    }

    /// String form of `number` under this representation
    pub fn render(self, number: &Number) -> String {
        match self {
            NumericKind::Integer => number
                .as_i64()
                .map(|v| v.to_string())
                .or_else(|| number.as_u64().map(|v| v.to_string()))
                .unwrap_or_else(|| number.to_string()),
            NumericKind::Float => number
                .as_f64()
                .map(|v| v.to_string())
                .unwrap_or_else(|| number.to_string()),
            // f64 would lose digits; print every digit of the exact value.
            NumericKind::BigInteger | NumericKind::Decimal => {
                let literal = number.to_string();
                DecimalValue::parse(&literal)
                    .and_then(|value| value.to_plain())
                    .unwrap_or(literal)
            }
        }
    }
}

/// Exponents beyond this are printed as written rather than expanded
const MAX_PLAIN_EXPONENT: i64 = 4096;

/// A JSON number literal reduced to `digits * 10^exponent`
///
/// `digits` has no leading or trailing zeros and is empty for zero, so two literals with the
/// same value compare equal.
#[derive(Debug, PartialEq, Eq)]
struct DecimalValue {
    negative: bool,
    digits: String,
    exponent: i64,
}

impl DecimalValue {
    fn parse(literal: &str) -> Option<Self> {
        let (negative, unsigned) = match literal.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, literal),
        };
        let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
            Some(at) => (&unsigned[..at], unsigned[at + 1..].parse::<i64>().ok()?),
            None => (unsigned, 0),
        };
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int_part.is_empty()
            || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let all_digits = format!("{}{}", int_part, frac_part);
        let significant = all_digits.trim_start_matches('0');
        let trimmed = significant.trim_end_matches('0');
        if trimmed.is_empty() {
            return Some(Self {
                negative: false,
                digits: String::new(),
                exponent: 0,
            });
        }

        let trailing = (significant.len() - trimmed.len()) as i64;
        let exponent = exponent
            .checked_sub(frac_part.len() as i64)?
            .checked_add(trailing)?;
        Some(Self {
            negative,
            digits: trimmed.to_string(),
            exponent,
        })
    }

    fn is_integral(&self) -> bool {
        self.exponent >= 0
    }

    /// Positional notation without an exponent
    fn to_plain(&self) -> Option<String> {
        if self.digits.is_empty() {
            return Some("0".to_string());
        }
        if self.exponent.abs() > MAX_PLAIN_EXPONENT {
            return None;
        }

        let sign = if self.negative { "-" } else { "" };
        let len = self.digits.len() as i64;
        let plain = if self.exponent >= 0 {
            format!("{}{}", self.digits, "0".repeat(self.exponent as usize))
        } else if len + self.exponent > 0 {
            let (int, frac) = self.digits.split_at((len + self.exponent) as usize);
            format!("{}.{}", int, frac)
        } else {
            format!("0.{}{}", "0".repeat((-(len + self.exponent)) as usize), self.digits)
        };
        Some(format!("{}{}", sign, plain))
    }
}

#[derive(Clone, Copy)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Path from the root to the current node, linked through the caller's stack frames
#[derive(Clone, Copy)]
struct Path<'a> {
    segment: Segment<'a>,
    parent: Option<&'a Path<'a>>,
}

impl fmt::Display for Path<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent {
            write!(f, "{}", parent)?;
        }
        match self.segment {
            Segment::Key(key) => write!(f, ".{}", key),
            Segment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

fn recorded_path(path: Option<&Path<'_>>, root_key: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut node = path;
    while let Some(current) = node {
        if let Segment::Key(key) = current.segment {
            keys.push(key.to_string());
        }
        node = current.parent;
    }
    keys.push(root_key.to_string());
    keys.reverse();
    keys
}

fn walk(
    value: &Value,
    path: Option<&Path<'_>>,
    root_key: &str,
    typecasts: &mut Vec<TypecastRecord>,
) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, child)| {
                    let here = Path {
                        segment: Segment::Key(key.as_str()),
                        parent: path,
                    };
                    (key.clone(), walk(child, Some(&here), root_key, typecasts))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, child)| {
                    let here = Path {
                        segment: Segment::Index(index),
                        parent: path,
                    };
                    walk(child, Some(&here), root_key, typecasts)
                })
                .collect(),
        ),
        Value::Number(number) => {
            if let Some(leaf) = path {
                trace!(root = root_key, path = %leaf, "numeric leaf cast to string");
            }
            typecasts.push(TypecastRecord {
                path: recorded_path(path, root_key),
                from: TypecastKind::String,
                to: TypecastKind::Float,
            });
            Value::String(NumericKind::of(number).render(number))
        }
        leaf => leaf.clone(),
    }
}

/// Rewrite every numeric leaf under `root` to a string
///
/// Record paths start with `root_key`. The input is left untouched.
pub fn transform(root: &Value, root_key: &str) -> Typecasted<Value> {
    let mut typecasts = Vec::new();
    let body = walk(root, None, root_key, &mut typecasts);
    Typecasted { body, typecasts }
}

/// Typecast the `metadata` tree of an event, leaving every other field as is
pub fn apply_number_to_string_typecasting(event: &LogEvent) -> Typecasted<LogEvent> {
    let Some(metadata) = event.metadata() else {
        return Typecasted {
            body: event.clone(),
            typecasts: Vec::new(),
        };
    };

    let Typecasted { body, typecasts } = transform(metadata, ROOT_SEGMENT);
    Typecasted {
        body: event.clone().with_metadata(body),
        typecasts,
    }
}
