//! Time functions and the datetime object exposed to templates

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveTime, TimeZone, Timelike, Utc};
use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};
use std::fmt::Write;
use std::sync::Arc;

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

/// Current local time, keeping the local UTC offset
pub fn now() -> Value {
    Value::from_object(DateTimeWrapper(Local::now().fixed_offset()))
}

pub fn utcnow() -> Value {
    Value::from_object(DateTimeWrapper(Utc::now().fixed_offset()))
}

/// Today's date at a local `HH:MM[:SS]` time
pub fn today_at(time_str: &str) -> Result<Value, Error> {
    let time = NaiveTime::parse_from_str(time_str, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time_str, "%H:%M"))
        .map_err(|e| invalid(format!("invalid time '{}': {}", time_str, e)))?;

    let local = Local
        .from_local_datetime(&Local::now().date_naive().and_time(time))
        .earliest()
        .ok_or_else(|| invalid(format!("{} does not exist today", time_str)))?;

    Ok(Value::from_object(DateTimeWrapper(local.fixed_offset())))
}

/// UNIX timestamp of a datetime object, RFC 3339 string or number
pub fn as_timestamp(value: Value) -> Result<f64, Error> {
    if let Some(dt) = value.downcast_object_ref::<DateTimeWrapper>() {
        return Ok(dt.0.timestamp() as f64 + f64::from(dt.0.timestamp_subsec_millis()) / 1000.0);
    }
    if let Some(s) = value.as_str() {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.timestamp() as f64);
        }
        if let Ok(ts) = s.trim().parse::<f64>() {
            return Ok(ts);
        }
    }
    if let Some(i) = value.as_i64() {
        return Ok(i as f64);
    }
    f64::try_from(value).map_err(|_| invalid("cannot convert to timestamp"))
}

/// A datetime as seen by templates
#[derive(Debug, Clone)]
pub struct DateTimeWrapper(pub DateTime<FixedOffset>);

impl DateTimeWrapper {
    /// chrono panics when displaying an invalid format, so render into a
    /// buffer and turn the formatter error into a template error
    fn strftime(&self, format: &str) -> Result<String, Error> {
        let mut out = String::new();
        write!(out, "{}", self.0.format(format))
            .map_err(|_| invalid(format!("invalid strftime format '{}'", format)))?;
        Ok(out)
    }
}

impl Object for DateTimeWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let dt = &self.0;
        match key.as_str()? {
            "year" => Some(Value::from(dt.year())),
            "month" => Some(Value::from(dt.month())),
            "day" => Some(Value::from(dt.day())),
            "hour" => Some(Value::from(dt.hour())),
            "minute" => Some(Value::from(dt.minute())),
            "second" => Some(Value::from(dt.second())),
            "microsecond" => Some(Value::from(dt.timestamp_subsec_micros())),
            _ => None,
        }
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &minijinja::State,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match name {
            "strftime" => {
                let format = args
                    .first()
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid("strftime requires a format string"))?;
                self.strftime(format).map(Value::from)
            }
            "isoformat" => {
                let timespec = args.first().and_then(|v| v.as_str());
                let text = match timespec {
                    Some("seconds") => self.0.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
                    _ => self.0.to_rfc3339(),
                };
                Ok(Value::from(text))
            }
            "timestamp" => Ok(Value::from(self.0.timestamp())),
            "weekday" => Ok(Value::from(self.0.weekday().num_days_from_monday())),
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("datetime has no method named {}", name),
            )),
        }
    }

    fn render(self: &Arc<Self>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%:z"))
    }
}
