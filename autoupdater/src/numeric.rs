//! Numeric values
//!
//! Helpers for updaters that display a number. Values are coerced the way a
//! loosely typed frontend would (numbers, numeric strings, booleans), but
//! anything that does not yield a finite number is reported as
//! `ProducerError::BadValue` instead of being dropped.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Number;

use crate::error::ProducerError;
use crate::producer::{Producer, ProducerResult, SharedProducer};
use crate::types::{CallArgs, Value};

/// Coerce a produced value into a finite number
///
/// ```rust
/// use autoupdater::numeric::parse_numeric;
/// use serde_json::json;
///
/// assert_eq!(parse_numeric(&json!(" 12.5 ")).unwrap(), 12.5);
/// assert!(parse_numeric(&json!("twelve")).is_err());
/// ```
pub fn parse_numeric(value: &Value) -> Result<f64, ProducerError> {
    let number = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ProducerError::bad_value(value, "number out of range"))?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed
                    .parse::<f64>()
                    .map_err(|e| ProducerError::bad_value(value, e.to_string()))?
            }
        }
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => {
            return Err(ProducerError::bad_value(value, "not a numeric value"));
        }
    };

    if !number.is_finite() {
        return Err(ProducerError::bad_value(value, "not a finite number"));
    }

    Ok(number)
}

/// Turn a parsed number back into a JSON value, preferring integers
pub fn to_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Value::from(number as i64)
    } else {
        Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Producer adapter that coerces every value to a number
pub struct NumericProducer {
    inner: SharedProducer,
}

impl Producer for NumericProducer {
    fn produce(&self, args: CallArgs) -> BoxFuture<'static, ProducerResult> {
        self.inner
            .produce(args)
            .map(|result| -> ProducerResult {
                match result? {
                    None | Some(Value::Null) => Ok(None),
                    Some(value) => parse_numeric(&value).map(|n| Some(to_value(n))),
                }
            })
            .boxed()
    }
}

/// Wrap `inner` so that its values are published as numbers
pub fn numeric(inner: SharedProducer) -> SharedProducer {
    Arc::new(NumericProducer { inner })
}
