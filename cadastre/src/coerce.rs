//! Field value coercions.
//!
//! Coercions are declared per column in the config (`functions`) and
//! compose left-to-right. A coercion that cannot produce a value yields
//! `Null`; the transform engine turns that into an error only for
//! non-nullable columns.

use chrono::NaiveDate;

use crate::error::{CadastreError, Result};

/// A column value between coercion and insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Date(d) => Some(d.to_string()),
        }
    }
}

/// Per-archive context the coercions draw from.
#[derive(Debug, Clone, Copy)]
pub struct CoercionCtx<'a> {
    /// Numeric year derived from the `YYYY-MM` input date
    pub millesime: i32,
    /// Two-character department code (`38`, `2A`, ...)
    pub dep: &'a str,
}

/// Derive the integer millésime from a `YYYY-MM` date string.
pub fn parse_millesime(date: &str) -> Result<i32> {
    let year = date
        .split_once('-')
        .map(|(y, m)| (y, m.len() == 2 && m.bytes().all(|b| b.is_ascii_digit()), y.len() == 4))
        .filter(|&(_, m_ok, y_ok)| m_ok && y_ok)
        .and_then(|(y, _, _)| y.parse::<i32>().ok());
    year.ok_or_else(|| CadastreError::Millesime(date.to_string()))
}

/// The recognized coercion set. Unknown names are a config error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    AddMillesime,
    AddDep,
    ToInt,
    ToFloat,
    ToDate,
    ToDateFr,
}

impl Coercion {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "addMillesime" => Ok(Self::AddMillesime),
            "addDep" => Ok(Self::AddDep),
            "toInt" => Ok(Self::ToInt),
            "toFloat" => Ok(Self::ToFloat),
            "toDate" => Ok(Self::ToDate),
            "toDateFR" => Ok(Self::ToDateFr),
            other => Err(CadastreError::ConfigInvalid(format!(
                "unknown coercion `{other}`"
            ))),
        }
    }

    pub fn apply(self, value: Value, ctx: CoercionCtx) -> Value {
        match self {
            Self::AddMillesime => Value::Int(i64::from(ctx.millesime)),
            Self::AddDep => match value.as_text() {
                Some(text) => Value::Text(format!("{}{}", ctx.dep, text)),
                None => Value::Null,
            },
            Self::ToInt => to_int(&value),
            Self::ToFloat => to_float(&value),
            Self::ToDate => to_date(&value),
            Self::ToDateFr => to_date_fr(&value),
        }
    }
}

/// Apply a coercion chain left-to-right.
pub fn apply_all(coercions: &[Coercion], mut value: Value, ctx: CoercionCtx) -> Value {
    for c in coercions {
        value = c.apply(value, ctx);
    }
    value
}

fn to_int(value: &Value) -> Value {
    match value {
        Value::Int(_) => value.clone(),
        _ => value
            .as_text()
            .and_then(|t| t.trim().parse::<i64>().ok())
            .map_or(Value::Null, Value::Int),
    }
}

/// Extract the first decimal number from the value (`12,34 m²` -> 12).
fn to_float(value: &Value) -> Value {
    let Some(text) = value.as_text() else {
        return Value::Null;
    };
    let bytes = text.as_bytes();
    let Some(start) = bytes.iter().position(u8::is_ascii_digit) else {
        return Value::Null;
    };
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_end = bytes[end + 1..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |p| end + 1 + p);
        if frac_end > end + 1 {
            end = frac_end;
        }
    }
    text[start..end]
        .parse::<f64>()
        .map_or(Value::Null, Value::Float)
}

/// `YYYYMMDD`; years below 1000 are placeholder values and map to null.
fn to_date(value: &Value) -> Value {
    let Some(text) = value.as_text() else {
        return Value::Null;
    };
    let digits = text.trim();
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Value::Null;
    }
    date_from_parts(&digits[..4], &digits[4..6], &digits[6..8])
}

/// `DDMMYYYY`, with optional `/` separators.
fn to_date_fr(value: &Value) -> Value {
    let Some(text) = value.as_text() else {
        return Value::Null;
    };
    let digits: String = text.chars().filter(|c| *c != '/').collect();
    let digits = digits.trim();
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Value::Null;
    }
    date_from_parts(&digits[4..8], &digits[2..4], &digits[..2])
}

fn date_from_parts(year: &str, month: &str, day: &str) -> Value {
    let (Ok(y), Ok(m), Ok(d)) = (year.parse(), month.parse(), day.parse()) else {
        return Value::Null;
    };
    if y < 1000 {
        return Value::Null;
    }
    NaiveDate::from_ymd_opt(y, m, d).map_or(Value::Null, Value::Date)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: CoercionCtx = CoercionCtx {
        millesime: 2025,
        dep: "38",
    };

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn to_int_parses_padded_integers() {
        assert_eq!(Coercion::ToInt.apply(text("0042"), CTX), Value::Int(42));
        assert_eq!(Coercion::ToInt.apply(text(""), CTX), Value::Null);
        assert_eq!(Coercion::ToInt.apply(text("abc"), CTX), Value::Null);
    }

    #[test]
    fn to_float_takes_the_first_decimal_number() {
        assert_eq!(
            Coercion::ToFloat.apply(text("12,34 m²"), CTX),
            Value::Float(12.0)
        );
        assert_eq!(
            Coercion::ToFloat.apply(text("ca. 3.5 ha"), CTX),
            Value::Float(3.5)
        );
        assert_eq!(Coercion::ToFloat.apply(text("none"), CTX), Value::Null);
        assert_eq!(Coercion::ToFloat.apply(text(""), CTX), Value::Null);
    }

    #[test]
    fn to_date_reads_compact_iso() {
        assert_eq!(
            Coercion::ToDate.apply(text("19990307"), CTX),
            Value::Date(NaiveDate::from_ymd_opt(1999, 3, 7).unwrap())
        );
        assert_eq!(Coercion::ToDate.apply(text("01990307"), CTX), Value::Null);
        assert_eq!(Coercion::ToDate.apply(text("19991342"), CTX), Value::Null);
        assert_eq!(Coercion::ToDate.apply(text(""), CTX), Value::Null);
    }

    #[test]
    fn to_date_fr_reads_day_first() {
        let expected = Value::Date(NaiveDate::from_ymd_opt(1999, 3, 7).unwrap());
        assert_eq!(Coercion::ToDateFr.apply(text("07/03/1999"), CTX), expected);
        assert_eq!(Coercion::ToDateFr.apply(text("07031999"), CTX), expected);
        assert_eq!(Coercion::ToDateFr.apply(text("07/03/0999"), CTX), Value::Null);
    }

    #[test]
    fn add_dep_prefixes_and_add_millesime_replaces() {
        assert_eq!(Coercion::AddDep.apply(text("X"), CTX), text("38X"));
        assert_eq!(
            Coercion::AddMillesime.apply(text("anything"), CTX),
            Value::Int(2025)
        );
    }

    #[test]
    fn chains_compose_left_to_right() {
        let chain = [Coercion::AddDep, Coercion::ToInt];
        assert_eq!(apply_all(&chain, text("0042"), CTX), Value::Int(380042));
    }

    #[test]
    fn millesime_year_extraction() {
        assert_eq!(parse_millesime("2025-04").unwrap(), 2025);
        assert!(parse_millesime("2025").is_err());
        assert!(parse_millesime("04-2025x").is_err());
    }
}
