//! Version adapter
//!
//! Maps logical payload field names to the wire names of the backend API
//! generation in use. Below the configured threshold the legacy names are
//! used; at or above it, and for any version that cannot be determined,
//! the current names are used.
//!
//! The adapter is pure: no I/O, no logging, no failure path.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{LogicalPayload, OperationKind};

/// Payload with wire-level field names, ready for the executor
pub type WirePayload = Map<String, Value>;

/// Default API major version at which the current field shape begins
pub const DEFAULT_VERSION_THRESHOLD: u32 = 18;

/// Backend API version as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiVersion {
    Known { major: u32, minor: u32 },
    Unknown,
}

impl ApiVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        ApiVersion::Known { major, minor }
    }

    /// Parse a server version string.
    ///
    /// Accepts `17`, `17.0`, `18.0+e`, `saas~17.2` and similar. Anything
    /// without a leading major number is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let raw = raw.rsplit('~').next().unwrap_or(raw);

        let mut parts = raw.split('.');
        let major = parts.next().and_then(leading_number);
        let minor = parts.next().and_then(leading_number).unwrap_or(0);

        match major {
            Some(major) => ApiVersion::Known { major, minor },
            None => ApiVersion::Unknown,
        }
    }

    pub fn major(&self) -> Option<u32> {
        match self {
            ApiVersion::Known { major, .. } => Some(*major),
            ApiVersion::Unknown => None,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiVersion::Known { major, minor } => write!(f, "{}.{}", major, minor),
            ApiVersion::Unknown => f.write_str("unknown"),
        }
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Field generation selected for a version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    Legacy,
    Current,
}

/// A logical field whose wire name differs between generations
struct FieldRule {
    /// `None` applies the rule to every kind
    kind: Option<OperationKind>,
    logical: &'static str,
    legacy: &'static str,
    current: &'static str,
}

const FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        kind: None,
        logical: "mobileNumber",
        legacy: "mobile",
        current: "mobile_phone",
    },
    FieldRule {
        kind: Some(OperationKind::Update),
        logical: "quantity",
        legacy: "qty_done",
        current: "quantity",
    },
];

/// Translates logical payloads into wire payloads
#[derive(Debug, Clone, Copy)]
pub struct VersionAdapter {
    threshold: u32,
}

impl Default for VersionAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_THRESHOLD)
    }
}

impl VersionAdapter {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Shape used for a version; unknown versions get the current shape
    pub fn shape_for(&self, version: ApiVersion) -> WireShape {
        match version.major() {
            Some(major) if major < self.threshold => WireShape::Legacy,
            _ => WireShape::Current,
        }
    }

    /// Wire name of a single logical field
    pub fn wire_name<'a>(
        &self,
        kind: OperationKind,
        logical: &'a str,
        shape: WireShape,
    ) -> Cow<'a, str> {
        let rule = FIELD_RULES
            .iter()
            .find(|r| r.logical == logical && r.kind.map_or(true, |k| k == kind));

        match (rule, shape) {
            (Some(rule), WireShape::Legacy) => Cow::Borrowed(rule.legacy),
            (Some(rule), WireShape::Current) => Cow::Borrowed(rule.current),
            (None, _) => snake_case(logical),
        }
    }

    /// Translate a whole logical payload, including nested objects
    pub fn to_wire_shape(
        &self,
        kind: OperationKind,
        logical: &LogicalPayload,
        version: ApiVersion,
    ) -> WirePayload {
        let shape = self.shape_for(version);
        self.map_object(kind, logical, shape)
    }

    fn map_object(&self, kind: OperationKind, obj: &Map<String, Value>, shape: WireShape) -> WirePayload {
        obj.iter()
            .map(|(key, value)| {
                let name = self.wire_name(kind, key, shape).into_owned();
                (name, self.map_value(kind, value, shape))
            })
            .collect()
    }

    fn map_value(&self, kind: OperationKind, value: &Value, shape: WireShape) -> Value {
        match value {
            Value::Object(obj) => Value::Object(self.map_object(kind, obj, shape)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.map_value(kind, item, shape))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// `partnerId` -> `partner_id`; already snake-case names pass through
fn snake_case(name: &str) -> Cow<'_, str> {
    if !name.chars().any(|c| c.is_ascii_uppercase()) {
        return Cow::Borrowed(name);
    }

    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}
