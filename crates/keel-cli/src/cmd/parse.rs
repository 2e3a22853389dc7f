//! Argument value parsers for tags, parameters, attributes, and endpoints.

use keel_core::model::{Endpoint, Tag, Value, ValueType};

/// `key=type:value` for a typed tag, `key=type` for a typed tag with no
/// value, or a bare `key` for an untyped tag with no value.
pub fn tag(raw: &str) -> Result<Tag, String> {
    let Some((key, typed)) = raw.split_once('=') else {
        return non_empty_key(raw).map(|key| Tag::unbound(key, None));
    };
    let key = non_empty_key(key)?;
    let (ty, value) = match typed.split_once(':') {
        Some((ty, value)) => (ty, Some(value)),
        None => (typed, None),
    };
    let ty: ValueType = ty
        .parse()
        .map_err(|e| format!("tag '{raw}': expected key=type:value or key=type ({e})"))?;
    let value = value
        .map(|value| Value::parse(ty, value).map_err(|e| format!("tag '{raw}': {e}")))
        .transpose()?;
    Ok(Tag::declared(key, ty, value))
}

/// `key=value`.
pub fn parameter(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("parameter '{raw}': expected key=value"))?;
    Ok((non_empty_key(key)?, value.to_string()))
}

/// `key=type`.
pub fn attribute(raw: &str) -> Result<(String, ValueType), String> {
    let (key, ty) = raw
        .split_once('=')
        .ok_or_else(|| format!("attribute '{raw}': expected key=type"))?;
    let ty = ty.parse().map_err(|e| format!("attribute '{raw}': {e}"))?;
    Ok((non_empty_key(key)?, ty))
}

/// `START` for an open endpoint, `START:END` for a pinned range.
pub fn endpoint(raw: &str) -> Result<Endpoint, String> {
    let id = |part: &str| {
        part.trim()
            .parse::<i64>()
            .map_err(|e| format!("endpoint '{raw}': {e}"))
    };
    match raw.split_once(':') {
        Some((start, end)) => Ok(Endpoint::pinned(id(start)?, id(end)?)),
        None => Ok(Endpoint::open(id(raw)?)),
    }
}

fn non_empty_key(key: &str) -> Result<String, String> {
    let key = key.trim();
    if key.is_empty() {
        Err("empty key".to_string())
    } else {
        Ok(key.to_string())
    }
}
