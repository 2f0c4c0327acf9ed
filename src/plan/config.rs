//! Plan file configuration types
//!
//! Defines the data structures for deserializing YAML plan files. Field names
//! follow the station's existing plan files (`Script`, `Product`, `Items`);
//! lowercase spellings are accepted as aliases.

use serde::Deserialize;
use serde_yaml::Value;

/// A complete plan file as written on disk
#[derive(Deserialize, Debug)]
pub struct PlanFile {
    /// Plan header
    #[serde(rename = "Script", alias = "script", default)]
    pub script: ScriptHeader,
    /// Products this plan applies to
    #[serde(rename = "Product", alias = "product", alias = "products")]
    pub product: Option<Vec<ProductEntry>>,
    /// Ordered test steps
    #[serde(rename = "Items", alias = "items", alias = "steps")]
    pub items: Option<Vec<ItemEntry>>,
}

/// Plan header section
#[derive(Deserialize, Debug, Default)]
pub struct ScriptHeader {
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Version", alias = "version", default)]
    pub version: Option<Value>,
    /// 0 for a single device, 1 for paired devices
    #[serde(rename = "Pairing", alias = "pairing", default)]
    pub pairing: u32,
    #[serde(rename = "ReleaseNote", alias = "release_note", default)]
    pub release_note: String,
    /// Default run mode: TX, RX or BOTH
    #[serde(rename = "Mode", alias = "mode")]
    pub mode: Option<String>,
}

/// One product entry
#[derive(Deserialize, Debug)]
pub struct ProductEntry {
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    /// MAC addresses per device
    #[serde(rename = "UseMac", alias = "mac_count", default)]
    pub use_mac: u32,
    /// Serial numbers per device
    #[serde(rename = "UseSn", alias = "sn_count", default)]
    pub use_sn: u32,
    #[serde(rename = "Version", alias = "version", default)]
    pub version: Option<Value>,
    #[serde(rename = "OtherMessage", alias = "other_message", default)]
    pub other_message: String,
}

/// One test step entry
#[derive(Deserialize, Debug)]
pub struct ItemEntry {
    #[serde(rename = "Title", alias = "title", default)]
    pub title: String,
    /// Message shown to the operator before a retry
    #[serde(rename = "Retry", alias = "retry", alias = "retry_message", default)]
    pub retry: String,
    /// Accepted range as "min,max"; either side may be empty
    #[serde(rename = "Valid", alias = "valid", default)]
    pub valid: Option<Value>,
    #[serde(rename = "Unit", alias = "unit", default)]
    pub unit: String,
    /// Seconds to wait after the step passes
    #[serde(rename = "Delay", alias = "delay", default)]
    pub delay: Option<Value>,
    /// Tool command line
    #[serde(rename = "Execute", alias = "execute", default)]
    pub execute: String,
}

/// Render a scalar YAML value as the text an operator wrote
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
