use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Longest string the one byte length prefix can describe.
pub const MAX_STRING_LEN: usize = 255;

/// Fields of the device configuration, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    Encryption,
    Dhcp,
    DeviceName,
    Ssid,
    Passkey,
    Hostname,
    StaticIp,
    StaticDns,
    StaticGateway,
    StaticSubnet,
}

impl ConfigField {
    pub const ALL: [ConfigField; 10] = [
        ConfigField::Encryption,
        ConfigField::Dhcp,
        ConfigField::DeviceName,
        ConfigField::Ssid,
        ConfigField::Passkey,
        ConfigField::Hostname,
        ConfigField::StaticIp,
        ConfigField::StaticDns,
        ConfigField::StaticGateway,
        ConfigField::StaticSubnet,
    ];

    /// The length-prefixed string fields following the header bytes.
    pub const STRINGS: [ConfigField; 8] = [
        ConfigField::DeviceName,
        ConfigField::Ssid,
        ConfigField::Passkey,
        ConfigField::Hostname,
        ConfigField::StaticIp,
        ConfigField::StaticDns,
        ConfigField::StaticGateway,
        ConfigField::StaticSubnet,
    ];

    /// Key used by the config app and in JSON.
    pub fn key(&self) -> &'static str {
        match self {
            ConfigField::Encryption => "encryption",
            ConfigField::Dhcp => "dhcp",
            ConfigField::DeviceName => "deviceName",
            ConfigField::Ssid => "ssid",
            ConfigField::Passkey => "passkey",
            ConfigField::Hostname => "hostname",
            ConfigField::StaticIp => "staticIP",
            ConfigField::StaticDns => "staticDNS",
            ConfigField::StaticGateway => "staticGateway",
            ConfigField::StaticSubnet => "staticSubnet",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }

    pub fn is_string(&self) -> bool {
        !matches!(self, ConfigField::Encryption | ConfigField::Dhcp)
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Configuration snapshot as stored on the device.
///
/// Strings are restricted to single byte characters (U+0000..=U+00FF) since
/// the firmware stores one byte per character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRecord {
    pub encryption: u8,
    pub dhcp: bool,
    #[serde(rename = "deviceName")]
    pub device_name: String,
    pub ssid: String,
    pub passkey: String,
    pub hostname: String,
    #[serde(rename = "staticIP")]
    pub static_ip: String,
    #[serde(rename = "staticDNS")]
    pub static_dns: String,
    #[serde(rename = "staticGateway")]
    pub static_gateway: String,
    #[serde(rename = "staticSubnet")]
    pub static_subnet: String,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            encryption: 7,
            dhcp: true,
            device_name: String::new(),
            ssid: String::new(),
            passkey: String::new(),
            hostname: String::new(),
            static_ip: String::new(),
            static_dns: String::new(),
            static_gateway: String::new(),
            static_subnet: String::new(),
        }
    }
}

impl ConfigRecord {
    /// Value of a string field, `None` for `encryption` and `dhcp`.
    pub fn string(&self, field: ConfigField) -> Option<&str> {
        let value = match field {
            ConfigField::Encryption | ConfigField::Dhcp => return None,
            ConfigField::DeviceName => &self.device_name,
            ConfigField::Ssid => &self.ssid,
            ConfigField::Passkey => &self.passkey,
            ConfigField::Hostname => &self.hostname,
            ConfigField::StaticIp => &self.static_ip,
            ConfigField::StaticDns => &self.static_dns,
            ConfigField::StaticGateway => &self.static_gateway,
            ConfigField::StaticSubnet => &self.static_subnet,
        };
        Some(value)
    }

    pub(crate) fn string_mut(&mut self, field: ConfigField) -> Option<&mut String> {
        let value = match field {
            ConfigField::Encryption | ConfigField::Dhcp => return None,
            ConfigField::DeviceName => &mut self.device_name,
            ConfigField::Ssid => &mut self.ssid,
            ConfigField::Passkey => &mut self.passkey,
            ConfigField::Hostname => &mut self.hostname,
            ConfigField::StaticIp => &mut self.static_ip,
            ConfigField::StaticDns => &mut self.static_dns,
            ConfigField::StaticGateway => &mut self.static_gateway,
            ConfigField::StaticSubnet => &mut self.static_subnet,
        };
        Some(value)
    }

    /// Apply UI updates keyed by field name.
    ///
    /// Unknown keys are dropped. String fields take JSON strings, any other
    /// value clears them. Either every update is applied or none is.
    ///
    /// Returns the fields that were written.
    pub fn apply_updates(
        &mut self,
        updates: &Map<String, Value>,
    ) -> Result<Vec<ConfigField>, ValidationError> {
        let mut next = self.clone();
        let mut applied = Vec::new();

        for (key, value) in updates {
            let Some(field) = ConfigField::from_key(key) else {
                continue;
            };

            match field {
                ConfigField::Encryption => next.encryption = parse_encryption(value)?,
                ConfigField::Dhcp => next.dhcp = is_truthy(value),
                _ => {
                    if let Some(target) = next.string_mut(field) {
                        *target = value.as_str().map(str::to_string).unwrap_or_default();
                    }
                }
            }
            applied.push(field);
        }

        *self = next;
        Ok(applied)
    }

    /// Check the record can be stored by the firmware.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.encryption > 7 {
            return Err(ValidationError::EncryptionOutOfRange(u64::from(
                self.encryption,
            )));
        }

        for field in ConfigField::STRINGS {
            let value = self.string(field).unwrap_or_default();

            if let Some(character) = value.chars().find(|c| u32::from(*c) > 0xff) {
                return Err(ValidationError::UnsupportedCharacter { field, character });
            }

            let len = value.chars().count();
            if len > MAX_STRING_LEN {
                return Err(ValidationError::FieldTooLong { field, len });
            }
        }

        Ok(())
    }
}

fn parse_encryption(value: &Value) -> Result<u8, ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    let Some(parsed) = parsed else {
        return Err(ValidationError::InvalidValue {
            field: ConfigField::Encryption,
            reason: format!("expected a non-negative integer, got {value}"),
        });
    };

    u8::try_from(parsed).map_err(|_| ValidationError::EncryptionOutOfRange(parsed))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
