//! Parameter slots: `${name}` placeholders substituted at instantiation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Matches `${name}` slots.
static SLOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Bound parameter values by name.
pub type Bindings = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Bool,
    /// Any JSON value.
    Json,
}

impl ParameterType {
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Bool => value.is_boolean(),
            ParameterType::Json => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ParameterType::String => "a string",
            ParameterType::Number => "a number",
            ParameterType::Bool => "a boolean",
            ParameterType::Json => "a JSON value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

impl ParameterSpec {
    pub fn required(name: &str, ty: ParameterType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, ty: ParameterType, default: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: false,
            default: Some(default),
        }
    }

    fn check(&self, value: &serde_json::Value) -> Result<()> {
        if self.ty.accepts(value) {
            Ok(())
        } else {
            Err(Error::ParameterType {
                name: self.name.clone(),
                expected: self.ty.name().to_string(),
            })
        }
    }
}

pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Slot names referenced in `s`.
pub fn slots_in(s: &str) -> impl Iterator<Item = &str> {
    SLOT_RE
        .captures_iter(s)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

/// Collect slot names referenced anywhere inside `value`.
pub fn collect_slots(value: &serde_json::Value, out: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::String(s) => out.extend(slots_in(s).map(str::to_string)),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_slots(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_slots(v, out)),
        _ => {}
    }
}

/// Type-check `bindings` against `params`, filling defaults.
///
/// Unbound optional parameters without a default resolve to null.
pub fn resolve(params: &[ParameterSpec], bindings: &Bindings) -> Result<Bindings> {
    if let Some(unknown) = bindings.keys().find(|k| !params.iter().any(|p| &p.name == *k)) {
        return Err(Error::Validation(format!("unknown worklet parameter '{}'", unknown)));
    }
    let mut resolved = Bindings::new();
    for param in params {
        let value = match (bindings.get(&param.name), &param.default) {
            (Some(v), _) => v.clone(),
            (None, _) if param.required => {
                return Err(Error::UnresolvedParameter(param.name.clone()));
            }
            (None, Some(default)) => default.clone(),
            (None, None) => serde_json::Value::Null,
        };
        if !value.is_null() {
            param.check(&value)?;
        }
        resolved.insert(param.name.clone(), value);
    }
    Ok(resolved)
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lookup<'a>(values: &'a Bindings, name: &str) -> Result<&'a serde_json::Value> {
    values
        .get(name)
        .ok_or_else(|| Error::UnresolvedParameter(name.to_string()))
}

/// Replace every slot in `s` with the textual form of its value.
pub fn substitute_str(s: &str, values: &Bindings) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in SLOT_RE.captures_iter(s) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        out.push_str(&render(lookup(values, name.as_str())?));
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(out)
}

/// Substitute slots throughout a JSON value. A string that is exactly one
/// slot takes the bound value with its type.
pub fn substitute_value(value: &serde_json::Value, values: &Bindings) -> Result<serde_json::Value> {
    Ok(match value {
        serde_json::Value::String(s) => {
            if let Some(caps) = SLOT_RE.captures(s) {
                if caps.get(0).is_some_and(|m| m.as_str().len() == s.len()) {
                    if let Some(name) = caps.get(1) {
                        return Ok(lookup(values, name.as_str())?.clone());
                    }
                }
            }
            serde_json::Value::String(substitute_str(s, values)?)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| substitute_value(v, values))
                .collect::<Result<_>>()?,
        ),
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), substitute_value(v, values)?);
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    })
}
