use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A typed control-plane argument: the atoms a control message can carry.
///
/// Untagged serde makes the JSON wire encoding the obvious one: `5` is an
/// int, `1.5` a float, `"A"` a string, `[0,1,2,3]` a list and
/// `{"colors": [...], "speed": 12}` a field bundle. Handlers branch on the
/// variant rather than reflecting on payload shape at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(IndexMap<String, Value>),
}

impl Value {
    /// Integer view: ints directly, floats truncated.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Numeric view over both number variants.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric view that also accepts numeric strings ("12", "-3.5").
    #[must_use]
    pub fn as_f64_lenient(&self) -> Option<f64> {
        match self {
            Value::Str(s) => s.trim().parse().ok(),
            other => other.as_f64(),
        }
    }

    /// Truthiness used by boolean-ish parameters: native bools, nonzero
    /// numbers, and the usual string spellings.
    #[must_use]
    pub fn as_bool_flexible(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0),
            Value::Str(s) => Some(matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "1" | "on"
            )),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_dict(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Every element as an f64, or None if any element is non-numeric.
    #[must_use]
    pub fn number_list(&self) -> Option<Vec<f64>> {
        self.as_list()?.iter().map(Value::as_f64).collect()
    }

    /// Every element as an i64, or None if any element is non-numeric.
    #[must_use]
    pub fn int_list(&self) -> Option<Vec<i64>> {
        self.as_list()?.iter().map(Value::as_i64).collect()
    }

    #[must_use]
    pub fn list_of_ints(items: impl IntoIterator<Item = i64>) -> Self {
        Value::List(items.into_iter().map(Value::Int).collect())
    }

    #[must_use]
    pub fn list_of_floats(items: impl IntoIterator<Item = f64>) -> Self {
        Value::List(items.into_iter().map(Value::Float).collect())
    }

    #[must_use]
    pub fn dict(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        )
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Parse a string payload that is really a list in disguise.
///
/// Clients sometimes deliver list parameters as a single string, either as a
/// JSON array (`"[0, 1, 2, 3]"`) or as comma/whitespace-delimited atoms
/// (`"0 1, 2 3"`). Returns None when the string doesn't parse as either.
#[must_use]
pub fn parse_string_list(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(|v| matches!(v, Value::List(_)));
    }
    let atoms: Vec<Value> = trimmed
        .replace(',', " ")
        .split_whitespace()
        .map(|tok| {
            if let Ok(i) = tok.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(f) = tok.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::Str(tok.to_owned())
            }
        })
        .collect();
    if atoms.is_empty() {
        None
    } else {
        Some(Value::List(atoms))
    }
}
