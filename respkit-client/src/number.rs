//! # Numeric Replies
//!
//! Purpose: Hold a number that arrived either as a RESP integer or as decimal
//! text, and project it to integer or float only when that is lossless.

use std::fmt;

use crate::error::{ClientError, ClientResult};

/// Numeric reply kept as its wire text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberValue {
    text: String,
}

impl NumberValue {
    pub fn from_integer(value: i64) -> Self {
        NumberValue {
            text: value.to_string(),
        }
    }

    /// Validates `text` as a decimal number (Redis float syntax included).
    pub fn parse(text: &str) -> ClientResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() || parse_f64(trimmed).is_none() {
            return Err(ClientError::InvalidNumber {
                text: text.to_string(),
                target: "number",
            });
        }
        Ok(NumberValue {
            text: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Integer projection; fails for fractional or out-of-range values.
    ///
    /// Decimal text is converted digit by digit, so `"9007199254740993.0"`
    /// keeps its last digit instead of rounding through `f64`.
    pub fn as_i64(&self) -> ClientResult<i64> {
        exact_integer(&self.text).ok_or_else(|| self.invalid("i64"))
    }

    pub fn as_u64(&self) -> ClientResult<u64> {
        let value = self.as_i64().map_err(|_| self.invalid("u64"))?;
        u64::try_from(value).map_err(|_| self.invalid("u64"))
    }

    pub fn as_f64(&self) -> ClientResult<f64> {
        parse_f64(&self.text).ok_or_else(|| self.invalid("f64"))
    }

    fn invalid(&self, target: &'static str) -> ClientError {
        ClientError::InvalidNumber {
            text: self.text.clone(),
            target,
        }
    }
}

impl fmt::Display for NumberValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Exact integer value of decimal text such as `12`, `-3.000` or `1.5e3`.
fn exact_integer(text: &str) -> Option<i64> {
    let (negative, body) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (mantissa, exponent) = match body.find(|c| c == 'e' || c == 'E') {
        Some(at) => (&body[..at], body[at + 1..].parse::<i32>().ok()?),
        None => (body, 0),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut digits = format!("{}{}", whole, fraction);
    let mut scale = exponent.checked_sub(i32::try_from(fraction.len()).ok()?)?;
    while scale < 0 && digits.ends_with('0') {
        digits.pop();
        scale += 1;
    }
    if scale < 0 {
        return None;
    }
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Some(0);
    }
    // i64 has 19 digits; anything longer cannot fit.
    if digits.len() + scale as usize > 20 {
        return None;
    }
    let mut value: i128 = digits.parse().ok()?;
    for _ in 0..scale {
        value *= 10;
    }
    i64::try_from(if negative { -value } else { value }).ok()
}

// Redis spells infinities "inf" / "-inf"; Rust also accepts longer forms.
fn parse_f64(text: &str) -> Option<f64> {
    match text {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => text.parse::<f64>().ok().filter(|value| !value.is_nan()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_text_has_float_but_no_integer_projection() {
        let value = NumberValue::parse("3.0000000000000004").expect("number");
        assert_eq!(value.as_f64().expect("f64"), 3.0000000000000004);
        assert!(matches!(
            value.as_i64(),
            Err(ClientError::InvalidNumber { target: "i64", .. })
        ));
    }

    #[test]
    fn integral_text_projects_to_integers() {
        let value = NumberValue::parse("10.0").expect("number");
        assert_eq!(value.as_i64().expect("i64"), 10);
        assert_eq!(value.as_u64().expect("u64"), 10);
        assert_eq!(NumberValue::from_integer(-7).as_i64().expect("i64"), -7);
        assert!(NumberValue::from_integer(-7).as_u64().is_err());
    }

    #[test]
    fn large_integers_keep_full_precision() {
        let value = NumberValue::parse("9223372036854775807").expect("number");
        assert_eq!(value.as_i64().expect("i64"), i64::MAX);
    }

    #[test]
    fn integral_decimal_above_float_precision_is_exact() {
        let value = NumberValue::parse("9007199254740993.0").expect("number");
        assert_eq!(value.as_i64().expect("i64"), 9_007_199_254_740_993);
        assert_eq!(NumberValue::parse("-1.5e3").expect("number").as_i64().expect("i64"), -1500);
        assert_eq!(NumberValue::parse("-0.000").expect("number").as_i64().expect("i64"), 0);
        assert!(NumberValue::parse("9223372036854775808.0").expect("number").as_i64().is_err());
        assert!(NumberValue::parse("1.25e1").expect("number").as_i64().is_err());
    }

    #[test]
    fn rejects_non_numeric_text() {
        assert!(NumberValue::parse("abc").is_err());
        assert!(NumberValue::parse("").is_err());
        assert!(NumberValue::parse("nan").is_err());
    }

    #[test]
    fn infinities_have_no_integer_projection() {
        let value = NumberValue::parse("-inf").expect("number");
        assert_eq!(value.as_f64().expect("f64"), f64::NEG_INFINITY);
        assert!(value.as_i64().is_err());
        assert_eq!(value.to_string(), "-inf");
    }
}
