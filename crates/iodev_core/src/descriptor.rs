//! Static device metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

///Read/write capability of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "wo")]
    WriteOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    ///"relay", "button", "temperature", "gps", ...
    pub kind: String,
    ///"bool", "f64", "struct", ...
    pub value_type: String,
    pub access: AccessMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    ///gpio=17, i2c=0x76, etc.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Descriptor {
    pub fn new(name: &str, kind: &str, value_type: &str, access: AccessMode) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            value_type: value_type.to_string(),
            access,
            unit: None,
            min: None,
            max: None,
            tags: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }
}

///Implemented by devices that can describe themselves.
pub trait Described {
    fn descriptor(&self) -> Descriptor;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_short_access_names() {
        let descriptor = Descriptor::new("soil", "vh400", "f64", AccessMode::ReadOnly)
            .with_unit("%")
            .with_range(0.0, 100.0)
            .with_tag("soil")
            .with_attribute("channel", "0");

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["access"], "ro");
        assert_eq!(json["unit"], "%");
        assert_eq!(json["attributes"]["channel"], "0");

        let back: Descriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn optional_fields_default() {
        let descriptor: Descriptor = serde_json::from_str(
            r#"{"name":"relay","kind":"relay","value_type":"bool","access":"rw"}"#,
        )
        .unwrap();
        assert_eq!(descriptor.access, AccessMode::ReadWrite);
        assert!(descriptor.unit.is_none());
        assert!(descriptor.tags.is_empty());
    }
}
