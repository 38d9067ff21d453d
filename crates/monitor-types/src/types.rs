//! Core record types for synchronized telemetry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};
use crate::timestamp::parse_remote_timestamp;

/// A capability advertised by a thing, with the attribute names it reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name (e.g. `"Temperature Measurement"`).
    #[serde(default)]
    pub name: String,
    /// Attribute names reported under this capability (e.g. `"temperature"`).
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// A remote device registered to an account.
///
/// Things are partitioned per access token: the same remote id seen through
/// two accounts is stored twice. The `active` flag marks membership in the
/// latest `things` page for the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    /// Remote-assigned, stable identifier.
    pub id: String,
    /// Human readable label.
    pub label: Option<String>,
    /// Capabilities and their attribute names.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Access token of the owning account.
    pub token: String,
    /// Whether the thing was present in the latest refresh for `token`.
    pub active: bool,
}

#[derive(Deserialize)]
struct RemoteThing {
    id: Option<String>,
    label: Option<String>,
    name: Option<String>,
    #[serde(default)]
    capabilities: Vec<Capability>,
}

impl Thing {
    /// Interpret one item of a remote `things` page for `token`.
    ///
    /// The result is stamped with `token` and marked active.
    pub fn from_remote(token: &str, item: &Value) -> ParseResult<Self> {
        if !item.is_object() {
            return Err(ParseError::NotAnObject);
        }
        let remote: RemoteThing = serde_json::from_value(item.clone())
            .map_err(|e| ParseError::InvalidData(e.to_string()))?;
        let id = remote
            .id
            .filter(|id| !id.is_empty())
            .ok_or(ParseError::MissingField("id"))?;

        Ok(Self {
            id,
            label: remote.label.or(remote.name),
            capabilities: remote.capabilities,
            token: token.to_string(),
            active: true,
        })
    }

    /// All attribute names across the thing's capabilities, de-duplicated.
    pub fn attributes(&self) -> BTreeSet<String> {
        self.capabilities
            .iter()
            .flat_map(|c| c.attributes.iter().cloned())
            .collect()
    }

    /// Label if present, otherwise the id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// One observed value of one attribute of a thing at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Id of the thing that reported the value.
    pub thing_id: String,
    /// Attribute name (e.g. `"temperature"`); empty when neither the
    /// request nor the item named one.
    pub state: String,
    /// Source-provided instant, second precision.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// Reported value as sent by the source.
    pub value: Value,
    /// Unit, when the source reports one.
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Deserialize)]
struct RemoteState {
    date: Option<String>,
    state: Option<String>,
    name: Option<String>,
    #[serde(default)]
    value: Value,
    unit: Option<String>,
}

impl State {
    /// Interpret one item of a remote `states` page.
    ///
    /// The attribute name is the requested one when given, otherwise the
    /// item's own `state` (or `name`) field, otherwise empty.
    pub fn from_remote(thing_id: &str, requested: Option<&str>, item: &Value) -> ParseResult<Self> {
        if !item.is_object() {
            return Err(ParseError::NotAnObject);
        }
        let remote: RemoteState = serde_json::from_value(item.clone())
            .map_err(|e| ParseError::InvalidData(e.to_string()))?;

        let date = remote.date.ok_or(ParseError::MissingField("date"))?;
        let date = parse_remote_timestamp(&date)?;
        let state = requested
            .map(str::to_string)
            .or(remote.state)
            .or(remote.name)
            .unwrap_or_default();

        Ok(Self {
            thing_id: thing_id.to_string(),
            state,
            date,
            value: remote.value,
            unit: remote.unit,
        })
    }

    /// The value as a number, accepting numeric strings.
    ///
    /// ```
    /// use monitor_types::State;
    /// use serde_json::json;
    ///
    /// let item = json!({"date": "2016-04-20T00:00:00Z", "value": "71.5"});
    /// let state = State::from_remote("d1", Some("temperature"), &item).unwrap();
    /// assert_eq!(state.numeric_value(), Some(71.5));
    /// ```
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A registered connection to the remote API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Local account name.
    pub name: String,
    /// Access token; `None` until the account is connected.
    pub token: Option<String>,
    /// Full token response from the authorization server, kept opaque.
    #[serde(default)]
    pub token_dict: Option<Value>,
    /// Discovered API endpoint for this token.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Account {
    /// Create an account with a token and no discovered endpoint.
    pub fn new(name: &str, token: &str) -> Self {
        Self {
            name: name.to_string(),
            token: Some(token.to_string()),
            ..Default::default()
        }
    }
}
