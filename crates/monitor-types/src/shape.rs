//! Query shapes: the parameter sets freshness is tracked against.
//!
//! A shape is the set of parameters of one remote query plus the account
//! token, without the `since`/`until` bounds. Refining the requested window
//! therefore reuses the same bookkeeping row. Shapes compare and encode
//! independently of the order their parameters were supplied in.

use std::collections::BTreeMap;
use std::fmt;

/// `function` parameter for listing things.
pub const FUNCTION_THINGS: &str = "things";
/// `function` parameter for reading states.
pub const FUNCTION_STATES: &str = "states";

const FUNCTION: &str = "function";
const TOKEN: &str = "token";
const BOUND_KEYS: [&str; 2] = ["since", "until"];

/// Parameter set identifying one kind of remote query for one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryShape {
    params: BTreeMap<String, String>,
}

impl QueryShape {
    /// Shape for `function` issued with `token`.
    pub fn new(function: &str, token: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert(FUNCTION.to_string(), function.to_string());
        params.insert(TOKEN.to_string(), token.to_string());
        Self { params }
    }

    /// Shape of a `things` listing of one kind.
    pub fn things(token: &str, kind: &str) -> Self {
        Self::new(FUNCTION_THINGS, token).with_param("kind", kind)
    }

    /// Shape of a `states` read for one thing, optionally one attribute.
    pub fn states(token: &str, thing_id: &str, state: Option<&str>) -> Self {
        let shape = Self::new(FUNCTION_STATES, token).with_param("thing_id", thing_id);
        match state {
            Some(state) => shape.with_param("state", state),
            None => shape,
        }
    }

    /// Build a shape from arbitrary parameters. Date bounds are discarded.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !BOUND_KEYS.contains(&k.as_str()))
            .collect();
        Self { params }
    }

    /// Add a parameter. Date bounds are ignored.
    #[must_use]
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        if !BOUND_KEYS.contains(&key) {
            self.params.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Value of one parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The `function` parameter, empty if absent.
    pub fn function(&self) -> &str {
        self.get(FUNCTION).unwrap_or_default()
    }

    /// The account token, empty if absent.
    pub fn token(&self) -> &str {
        self.get(TOKEN).unwrap_or_default()
    }

    /// Parameters sent to the remote API: everything except the token,
    /// which travels as the bearer credential.
    pub fn request_params(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter(|(k, _)| k.as_str() != TOKEN)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Canonical encoding used as the bookkeeping key.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Iterate the parameters in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", escape(k), escape(v))?;
        }
        Ok(())
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
    out
}
