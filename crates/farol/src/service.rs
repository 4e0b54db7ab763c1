//! Service descriptor model and its keyspace value codec
//!
//! A registered service is stored as one JSON value under its session
//! key: location, name, priority/weight, TTL, the four-part service
//! type, and a list of typed properties. `decode(encode(x))` is
//! field-for-field equal to `x`, including byte-array and opaque
//! property values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DiscoveryError, Result};

/// Four-part service type: name tokens, scopes, protocols, and the
/// naming authority.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceType {
    pub services: Vec<String>,
    pub scopes: Vec<String>,
    pub protocols: Vec<String>,
    pub naming_authority: String,
}

impl ServiceType {
    pub fn new(services: &[&str], scopes: &[&str], protocols: &[&str], authority: &str) -> Self {
        Self {
            services: services.iter().map(|s| s.to_string()).collect(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            protocols: protocols.iter().map(|s| s.to_string()).collect(),
            naming_authority: authority.to_string(),
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "_{}._{}.{}._{}",
            self.services.join("._"),
            self.protocols.join("._"),
            self.scopes.join("."),
            self.naming_authority
        )
    }
}

/// A typed service property value.
///
/// `Bytes` is base64-encoded on the wire; `Opaque` keeps whatever JSON
/// shape the writer supplied, so numbers and booleans survive the
/// round-trip as themselves.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Bytes(Vec<u8>),
    Opaque(Value),
}

/// One named service property.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

impl Property {
    pub fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: PropertyValue::Str(value.to_string()),
        }
    }

    pub fn bytes(name: &str, value: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            value: PropertyValue::Bytes(value.to_vec()),
        }
    }

    pub fn opaque(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            value: PropertyValue::Opaque(value),
        }
    }
}

/// Application-level service descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceRecord {
    /// Location URI of the advertised endpoint
    pub location: String,
    /// Human-readable service name; may be empty
    pub service_name: String,
    pub service_type: ServiceType,
    pub priority: i32,
    pub weight: i32,
    /// Keyspace entry TTL in seconds; zero means no expiry
    pub ttl: u32,
    /// Ordered property list
    pub properties: Vec<Property>,
}

impl ServiceRecord {
    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Look up a string-typed property by name.
    pub fn property_string(&self, name: &str) -> Option<&str> {
        match self.property(name) {
            Some(PropertyValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// True when `other` advertises the same (service type, location)
    /// identity.
    pub fn same_identity(&self, other: &ServiceRecord) -> bool {
        self.service_type == other.service_type && self.location == other.location
    }

    /// Serialize to the keyspace value format.
    pub fn encode(&self) -> Result<String> {
        let wire = WireRecord {
            location: self.location.clone(),
            service_name: self.service_name.clone(),
            priority: self.priority,
            weight: self.weight,
            ttl: self.ttl,
            service_type: self.service_type.clone(),
            properties: self.properties.iter().map(WireProperty::from).collect(),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Strict inverse of [`encode`](Self::encode).
    pub fn decode(value: &str) -> Result<Self> {
        let wire: WireRecord = serde_json::from_str(value)?;
        let mut properties = Vec::with_capacity(wire.properties.len());
        for p in wire.properties {
            properties.push(p.try_into()?);
        }
        Ok(Self {
            location: wire.location,
            service_name: wire.service_name,
            service_type: wire.service_type,
            priority: wire.priority,
            weight: wire.weight,
            ttl: wire.ttl,
            properties,
        })
    }
}

/// Clamp a wide TTL to the storable 32-bit seconds range rather than
/// rejecting it.
pub fn clamp_ttl(ttl: u64) -> u32 {
    ttl.min(u32::MAX as u64) as u32
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    location: String,
    #[serde(default)]
    service_name: String,
    priority: i32,
    weight: i32,
    ttl: u32,
    service_type: ServiceType,
    #[serde(default)]
    properties: Vec<WireProperty>,
}

const PROP_TYPE_STRING: &str = "string";
const PROP_TYPE_BYTES: &str = "bytes";
const PROP_TYPE_OPAQUE: &str = "opaque";

#[derive(Deserialize, Serialize)]
struct WireProperty {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    value: Value,
}

impl From<&Property> for WireProperty {
    fn from(p: &Property) -> Self {
        let (kind, value) = match &p.value {
            PropertyValue::Str(s) => (PROP_TYPE_STRING, Value::String(s.clone())),
            PropertyValue::Bytes(b) => (PROP_TYPE_BYTES, Value::String(BASE64.encode(b))),
            PropertyValue::Opaque(v) => (PROP_TYPE_OPAQUE, v.clone()),
        };
        Self {
            name: p.name.clone(),
            kind: kind.to_string(),
            value,
        }
    }
}

impl TryFrom<WireProperty> for Property {
    type Error = DiscoveryError;

    fn try_from(p: WireProperty) -> Result<Self> {
        let value = match p.kind.as_str() {
            PROP_TYPE_STRING => match p.value {
                Value::String(s) => PropertyValue::Str(s),
                other => {
                    return Err(DiscoveryError::Decode(format!(
                        "property {} tagged string but value is {}",
                        p.name, other
                    )));
                }
            },
            PROP_TYPE_BYTES => match p.value {
                Value::String(s) => {
                    let bytes = BASE64.decode(s.as_bytes()).map_err(|e| {
                        DiscoveryError::Decode(format!("property {}: bad base64: {}", p.name, e))
                    })?;
                    PropertyValue::Bytes(bytes)
                }
                other => {
                    return Err(DiscoveryError::Decode(format!(
                        "property {} tagged bytes but value is {}",
                        p.name, other
                    )));
                }
            },
            PROP_TYPE_OPAQUE => PropertyValue::Opaque(p.value),
            other => {
                return Err(DiscoveryError::Decode(format!(
                    "property {} has unknown type tag {}",
                    p.name, other
                )));
            }
        };
        Ok(Self {
            name: p.name,
            value,
        })
    }
}
