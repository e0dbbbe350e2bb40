// Declarative JSON-to-property mapping.
//
// Each entity type declares a static table of `FieldDescriptor`s; one
// generic walk applies a response payload to a `PropertyBag` through
// that table. Dotted paths descend into nested objects, so a field can
// live at `commit.message` without any intermediate type.

use chrono::{DateTime, Utc};
use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::store::properties::{PropertyBag, PropertyValue};

/// JSON scalar coercions.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScalarKind {
    Str,
    I64,
    Bool,
    /// RFC 3339 timestamp.
    Time,
    Url,
}

/// How a field's JSON fragment becomes entity state.
pub(crate) enum FieldKind<T> {
    /// Coerce a scalar and store it under the field name.
    Scalar(ScalarKind),
    /// Canonicalize a nested entity object and store the handle.
    /// An explicit `null` is stored as [`PropertyValue::Null`].
    Entity(fn(&T, &Value) -> Result<PropertyValue, Error>),
    /// Hand the fragment to the entity itself; nothing is stored in
    /// the bag. Used for nested lists and key-backed sub-objects.
    Inline(fn(&T, &Value) -> Result<(), Error>),
}

// Derived impls would demand `T: Copy`; the variants only ever hold
// function pointers, which are `Copy` for any `T`.
impl<T> Clone for FieldKind<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldKind<T> {}

/// One mapped field of an entity type.
pub(crate) struct FieldDescriptor<T> {
    /// Property name the value is stored (and notified) under.
    pub(crate) name: &'static str,
    /// Dot-separated path into the response payload.
    pub(crate) path: &'static str,
    pub(crate) kind: FieldKind<T>,
}

impl<T> FieldDescriptor<T> {
    pub(crate) const fn scalar(name: &'static str, path: &'static str, kind: ScalarKind) -> Self {
        Self {
            name,
            path,
            kind: FieldKind::Scalar(kind),
        }
    }

    pub(crate) const fn entity(
        name: &'static str,
        path: &'static str,
        init: fn(&T, &Value) -> Result<PropertyValue, Error>,
    ) -> Self {
        Self {
            name,
            path,
            kind: FieldKind::Entity(init),
        }
    }

    pub(crate) const fn inline(
        name: &'static str,
        path: &'static str,
        map: fn(&T, &Value) -> Result<(), Error>,
    ) -> Self {
        Self {
            name,
            path,
            kind: FieldKind::Inline(map),
        }
    }
}

/// Apply a response payload to a bag through a descriptor table.
///
/// Fields absent from the payload are left untouched; a partial
/// representation (e.g. the compact shape nested inside another
/// resource) only updates what it carries.
pub(crate) fn apply_fields<T>(
    target: &T,
    bag: &PropertyBag,
    fields: &[FieldDescriptor<T>],
    data: &Value,
) -> Result<(), Error> {
    if !data.is_object() {
        return Err(Error::data("expected a JSON object", data));
    }
    for field in fields {
        let Some(value) = lookup(data, field.path) else {
            continue;
        };
        match field.kind {
            FieldKind::Scalar(kind) => bag.set(field.name, coerce(kind, field.name, value)?),
            FieldKind::Entity(init) => {
                let stored = if value.is_null() {
                    PropertyValue::Null
                } else {
                    init(target, value)?
                };
                bag.set(field.name, stored);
            }
            FieldKind::Inline(map) => {
                if !value.is_null() {
                    map(target, value)?;
                }
            }
        }
    }
    Ok(())
}

/// Descend a dot-separated path into a JSON object tree.
fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn coerce(kind: ScalarKind, name: &str, value: &Value) -> Result<PropertyValue, Error> {
    if value.is_null() {
        return Ok(PropertyValue::Null);
    }
    match kind {
        ScalarKind::Str => value
            .as_str()
            .map(|raw| PropertyValue::Str(raw.to_owned()))
            .ok_or_else(|| mismatch(name, "a string", value)),
        ScalarKind::I64 => value
            .as_i64()
            .map(PropertyValue::Int)
            .ok_or_else(|| mismatch(name, "an integer", value)),
        ScalarKind::Bool => value
            .as_bool()
            .map(PropertyValue::Bool)
            .ok_or_else(|| mismatch(name, "a boolean", value)),
        ScalarKind::Time => value
            .as_str()
            .and_then(parse_time)
            .map(PropertyValue::Time)
            .ok_or_else(|| mismatch(name, "an RFC 3339 timestamp", value)),
        ScalarKind::Url => value
            .as_str()
            .and_then(|raw| Url::parse(raw).ok())
            .map(PropertyValue::Url)
            .ok_or_else(|| mismatch(name, "a URL", value)),
    }
}

fn mismatch(name: &str, expected: &str, value: &Value) -> Error {
    Error::data(format!("field `{name}` is not {expected}"), value)
}

pub(crate) fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

// ── Required-field extraction ───────────────────────────────────────
//
// Identifying values (logins, numbers, SHAs) must be present before an
// entity can exist at all; their absence is payload corruption.

pub(crate) fn required_str<'a>(data: &'a Value, key: &str) -> Result<&'a str, Error> {
    data.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::data(format!("required field `{key}` is missing or not a string"), data))
}

pub(crate) fn required_i64(data: &Value, key: &str) -> Result<i64, Error> {
    data.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::data(format!("required field `{key}` is missing or not an integer"), data))
}

pub(crate) fn required_u64(data: &Value, key: &str) -> Result<u64, Error> {
    data.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::data(format!("required field `{key}` is missing or not an integer"), data))
}
