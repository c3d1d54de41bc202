//! Filters beyond the minijinja builtins

use minijinja::value::{Kwargs, Value};
use minijinja::{Error, ErrorKind};
use regex::Regex;

fn value_to_f64(value: &Value) -> Option<f64> {
    if let Some(s) = value.as_str() {
        return s.trim().parse::<f64>().ok();
    }
    f64::try_from(value.clone())
        .ok()
        .or_else(|| value.as_i64().map(|i| i as f64))
}

/// `"Front Door" | slugify` -> `front_door`
pub fn slugify(value: &str, kwargs: Kwargs) -> Result<String, Error> {
    let separator: String = kwargs
        .get::<Option<String>>("separator")?
        .unwrap_or_else(|| "_".to_string());
    kwargs.assert_all_used()?;
    Ok(slug::slugify(value).replace('-', &separator))
}

pub fn regex_replace(value: &str, find: &str, replace: &str) -> Result<String, Error> {
    let re = Regex::new(find)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid regex: {}", e)))?;
    Ok(re.replace_all(value, replace).into_owned())
}

/// Float conversion falling back to `default` (or 0.0)
pub fn to_float(value: Value, default: Option<Value>) -> Value {
    let fallback = default.as_ref().and_then(value_to_f64).unwrap_or(0.0);
    Value::from(value_to_f64(&value).unwrap_or(fallback))
}

/// Integer conversion, truncating floats, falling back to `default` (or 0)
pub fn to_int(value: Value, default: Option<Value>) -> Value {
    if let Some(i) = value.as_i64() {
        return Value::from(i);
    }
    let fallback = default.as_ref().and_then(value_to_f64).unwrap_or(0.0);
    Value::from(value_to_f64(&value).unwrap_or(fallback).trunc() as i64)
}
