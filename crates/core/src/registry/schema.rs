//! Parameter parsing and field checks shared by every service definition.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^\s@<>]+@[^\s@<>]+\.[^\s@<>]+$").ok());

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Post-deserialization checks serde cannot express (ranges, formats, list bounds).
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Deserializes `params` into `T`, applying serde defaults, then runs [`Validate`].
///
/// A missing or `null` params value is treated as an empty object. Unknown keys are dropped.
pub fn parse_params<T>(params: &Value) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Validate,
{
    let source = match params {
        Value::Null => Value::Object(Map::new()),
        Value::Object(_) => params.clone(),
        _ => return Err(ValidationError::new("params", "expected a JSON object")),
    };

    let parsed: T = serde_json::from_value(source)
        .map_err(|error| ValidationError::new("params", error.to_string()))?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn ensure_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::new(field, format!("must be between {min} and {max}")));
    }
    Ok(())
}

pub fn ensure_min(field: &str, value: u64, min: u64) -> Result<(), ValidationError> {
    if value < min {
        return Err(ValidationError::new(field, format!("must be at least {min}")));
    }
    Ok(())
}

/// Path parameters must be non-empty so they cannot collapse a URL segment.
pub fn ensure_present(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(())
}

pub fn ensure_email(field: &str, value: &str) -> Result<(), ValidationError> {
    let valid = EMAIL_PATTERN.as_ref().map(|pattern| pattern.is_match(value)).unwrap_or(false);
    if !valid {
        return Err(ValidationError::new(field, "must be a valid email address"));
    }
    Ok(())
}

pub fn ensure_url(field: &str, value: &str) -> Result<(), ValidationError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(()),
        _ => Err(ValidationError::new(field, "must be an absolute http(s) URL")),
    }
}

pub fn ensure_len<T>(field: &str, items: &[T], min: usize, max: usize) -> Result<(), ValidationError> {
    if items.len() < min || items.len() > max {
        return Err(ValidationError::new(
            field,
            format!("must contain between {min} and {max} items"),
        ));
    }
    Ok(())
}
