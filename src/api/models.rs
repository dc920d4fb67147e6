use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend-issued handle a user is addressed by.
///
/// Always stored trimmed and uppercased so comparisons against inbound
/// events and user input are exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pin(String);

impl Pin {
    /// Normalize raw input. Returns `None` when nothing is left after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let pin = raw.trim().to_uppercase();
        if pin.is_empty() { None } else { Some(Self(pin)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Pin {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pin::parse(&value).ok_or_else(|| "empty PIN".to_string())
    }
}

impl From<Pin> for String {
    fn from(pin: Pin) -> Self {
        pin.0
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    /// Empty asks the backend for a fresh PIN.
    pub pin: String,
}

impl RegisterRequest {
    pub fn new(stored: Option<&Pin>) -> Self {
        Self { pin: stored.map(|p| p.as_str().to_string()).unwrap_or_default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub pin: Pin,
    #[serde(default)]
    pub reused: bool,
}

#[derive(Debug, Deserialize)]
pub struct PinExistsResponse {
    pub exists: bool,
}

/// Pull PINs out of a `/api/contacts` body. Plain string arrays are the
/// documented shape; objects with a `pin` field and `contacts`/`data`
/// wrappers are tolerated.
pub fn contacts_from_json(json: &serde_json::Value) -> Vec<Pin> {
    let list = json
        .as_array()
        .or_else(|| json.get("contacts").and_then(|v| v.as_array()))
        .or_else(|| json.get("data").and_then(|v| v.as_array()));
    let Some(list) = list else { return Vec::new() };

    let mut out: Vec<Pin> = Vec::new();
    for item in list {
        let raw = item
            .as_str()
            .or_else(|| item.get("pin").and_then(|v| v.as_str()))
            .unwrap_or("");
        if let Some(pin) = Pin::parse(raw) {
            if !out.contains(&pin) {
                out.push(pin);
            }
        }
    }
    out
}
