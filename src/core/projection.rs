//! Purpose: Field projection for element reads and list bound coercion.
//! Exports: `Projection`, `ListBound`, `IDENTITY_FIELDS`.
//! Role: Request/response shaping only; push frames are never projected.
//! Invariants: A projection always keeps `id`, `name` and `uri`.
//! Invariants: Numeric-looking bounds become numbers; everything else passes through verbatim.
use serde_json::{Map, Value};

use super::plugin::Payload;

pub const IDENTITY_FIELDS: [&str; 3] = ["id", "name", "uri"];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Projection {
    keep: Vec<String>,
}

impl Projection {
    /// Parse a comma separated `$fields` value.
    pub fn parse(fields: &str) -> Self {
        let mut keep: Vec<String> = IDENTITY_FIELDS.iter().map(|f| f.to_string()).collect();
        for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if !keep.iter().any(|existing| existing == field) {
                keep.push(field.to_string());
            }
        }
        Self { keep }
    }

    pub fn fields(&self) -> &[String] {
        &self.keep
    }

    pub fn apply(&self, payload: &Payload) -> Payload {
        let mut out = Map::new();
        for key in &self.keep {
            if let Some(value) = payload.get(key) {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ListBound {
    Number(f64),
    Token(String),
}

impl ListBound {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(number) if number.is_finite() && !raw.trim().is_empty() => ListBound::Number(number),
            _ => ListBound::Token(raw.to_string()),
        }
    }

    /// Non-negative whole numbers as an index.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            ListBound::Number(number) if *number >= 0.0 && number.fract() == 0.0 => {
                Some(*number as usize)
            }
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ListBound::Number(number) => serde_json::Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ListBound::Token(token) => Value::String(token.clone()),
        }
    }
}
