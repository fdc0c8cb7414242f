//! Identity record parsed from an `*IDN?` reply.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Keys of the identity record, in the order the instrument reports them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityField {
    Manufacturer,
    Model,
    SerialNumber,
    FirmwareVersion,
}

impl IdentityField {
    pub const ALL: [IdentityField; 4] = [
        IdentityField::Manufacturer,
        IdentityField::Model,
        IdentityField::SerialNumber,
        IdentityField::FirmwareVersion,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            IdentityField::Manufacturer => "mfg",
            IdentityField::Model => "model",
            IdentityField::SerialNumber => "serial",
            IdentityField::FirmwareVersion => "version",
        }
    }
}

/// Identity of a connected instrument.
///
/// Fields are filled positionally from the comma separated `*IDN?` reply. A short reply leaves the
/// trailing fields empty instead of failing, fields beyond the fourth are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "mfg", skip_serializing_if = "Option::is_none", default)]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(rename = "serial", skip_serializing_if = "Option::is_none", default)]
    pub serial_number: Option<String>,
    #[serde(rename = "version", skip_serializing_if = "Option::is_none", default)]
    pub firmware_version: Option<String>,
}

impl Identity {
    pub fn parse(reply: &str) -> Self {
        let cleaned: String = reply.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        let mut ret = Identity::default();
        for (field, value) in IdentityField::ALL.iter().zip(cleaned.split(',')) {
            *ret.slot(*field) = Some(value.to_string());
        }
        ret
    }

    fn slot(&mut self, field: IdentityField) -> &mut Option<String> {
        match field {
            IdentityField::Manufacturer => &mut self.manufacturer,
            IdentityField::Model => &mut self.model,
            IdentityField::SerialNumber => &mut self.serial_number,
            IdentityField::FirmwareVersion => &mut self.firmware_version,
        }
    }

    pub fn get(&self, field: IdentityField) -> Option<&str> {
        let ret = match field {
            IdentityField::Manufacturer => &self.manufacturer,
            IdentityField::Model => &self.model,
            IdentityField::SerialNumber => &self.serial_number,
            IdentityField::FirmwareVersion => &self.firmware_version,
        };
        ret.as_deref()
    }

    /// Populated fields as `(key, value)` pairs in reply order.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        IdentityField::ALL
            .iter()
            .filter_map(|field| self.get(*field).map(|value| (field.key(), value)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self
            .entries()
            .into_iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
