use std::{fmt, str::FromStr};

use thiserror::Error;

/// An object in the dictionary of one slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectAddress {
    pub slave: u16,
    pub index: u16,
    pub sub_index: u8,
}

impl ObjectAddress {
    pub const fn new(slave: u16, index: u16, sub_index: u8) -> Self {
        Self {
            slave,
            index,
            sub_index,
        }
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}:{:#x}", self.slave, self.index, self.sub_index)
    }
}

/// Address of a process variable as written in a mapping list.
///
/// Either a raw object (`"<slave>:0x<index>:0x<subindex>"`) or a symbolic
/// name attached to a slave (`"<slave>:<name>"`). Names are matched
/// case-sensitively by whoever interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkAddress {
    Object(ObjectAddress),
    Named { slave: u16, name: String },
}

impl NetworkAddress {
    pub fn named(slave: u16, name: &str) -> Self {
        NetworkAddress::Named {
            slave,
            name: name.to_string(),
        }
    }

    pub fn slave(&self) -> u16 {
        match self {
            NetworkAddress::Object(address) => address.slave,
            NetworkAddress::Named { slave, .. } => *slave,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            NetworkAddress::Object(_) => None,
            NetworkAddress::Named { name, .. } => Some(name),
        }
    }
}

impl From<ObjectAddress> for NetworkAddress {
    fn from(address: ObjectAddress) -> Self {
        NetworkAddress::Object(address)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkAddress::Object(address) => address.fmt(f),
            NetworkAddress::Named { slave, name } => write!(f, "{}:{}", slave, name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("malformed network address \"{0}\"")]
    Malformed(String),
    #[error("invalid slave position in \"{0}\"")]
    Slave(String),
    #[error("invalid object index in \"{0}\"")]
    Index(String),
    #[error("invalid subindex in \"{0}\"")]
    SubIndex(String),
}

// decimal, or hexadecimal with a 0x prefix
fn parse_number(field: &str) -> Option<u32> {
    match field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

impl FromStr for NetworkAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let fields: Vec<&str> = s.split(':').collect();

        let slave = parse_number(fields[0])
            .and_then(|slave| u16::try_from(slave).ok())
            .ok_or_else(|| AddressError::Slave(s.to_string()))?;

        match fields[1..] {
            [name] if !name.is_empty() && parse_number(name).is_none() => {
                Ok(NetworkAddress::named(slave, name))
            }
            [index, sub_index] => {
                let index = parse_number(index)
                    .and_then(|index| u16::try_from(index).ok())
                    .ok_or_else(|| AddressError::Index(s.to_string()))?;
                let sub_index = parse_number(sub_index)
                    .and_then(|sub_index| u8::try_from(sub_index).ok())
                    .ok_or_else(|| AddressError::SubIndex(s.to_string()))?;

                Ok(NetworkAddress::Object(ObjectAddress::new(
                    slave, index, sub_index,
                )))
            }
            _ => Err(AddressError::Malformed(s.to_string())),
        }
    }
}
