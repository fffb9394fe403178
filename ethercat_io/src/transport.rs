use std::{fmt, io, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ObjectAddress;

mod simulated;
pub use simulated::{SimulatedSlave, SimulatedTransport};

#[cfg(feature = "igh")]
mod igh;
#[cfg(feature = "igh")]
pub use igh::IghTransport;

/// Direction seen from the master: inputs are read from the bus, outputs written to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdoEntryDescriptor {
    pub index: u16,
    pub sub_index: u8,
    pub bit_length: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdoDescriptor {
    pub index: u16,
    pub entries: Vec<PdoEntryDescriptor>,
}

/// PDOs assigned to one sync manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroup {
    pub index: u8,
    pub direction: Direction,
    pub pdos: Vec<PdoDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveDescriptor {
    pub position: u16,
    pub vendor_id: u32,
    pub product_code: u32,
    pub name: String,
    pub sync_groups: Vec<SyncGroup>,
}

impl SlaveDescriptor {
    /// First sync manager of the given direction that carries PDOs.
    pub fn sync_group(&self, direction: Direction) -> Option<&SyncGroup> {
        self.sync_groups
            .iter()
            .find(|sm| sm.direction == direction && !sm.pdos.is_empty())
    }

    pub fn entries(&self, direction: Direction) -> impl Iterator<Item = &PdoEntryDescriptor> {
        self.sync_group(direction)
            .into_iter()
            .flat_map(|sm| sm.pdos.iter())
            .flat_map(|pdo| pdo.entries.iter())
    }

    /// Bit length of a mapped object, 0 if the object is in none of the PDOs.
    pub fn bit_length(&self, index: u16, sub_index: u8, direction: Direction) -> u8 {
        self.entries(direction)
            .find(|e| e.index == index && e.sub_index == sub_index)
            .map(|e| e.bit_length)
            .unwrap_or(0)
    }
}

/// Lookup of the discovered PDO mapping of the bus.
pub trait ObjectDictionary {
    fn contains_slave(&self, slave: u16) -> bool;

    /// 0 means "not found".
    fn bit_length(&self, address: &ObjectAddress, direction: Direction) -> u8;
}

impl ObjectDictionary for [SlaveDescriptor] {
    fn contains_slave(&self, slave: u16) -> bool {
        self.iter().any(|s| s.position == slave)
    }

    fn bit_length(&self, address: &ObjectAddress, direction: Direction) -> u8 {
        self.iter()
            .find(|s| s.position == address.slave)
            .map(|s| s.bit_length(address.index, address.sub_index, direction))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub address: ObjectAddress,
    pub direction: Direction,
}

/// Location of a registered object in the process image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldOffset {
    pub byte: usize,
    pub bit: u8,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("EtherCAT master request failed: {0}")]
    Master(String),
    #[error("EtherCAT slave {0} not found")]
    SlaveNotFound(u16),
    #[error("object {0} is not mapped in any PDO")]
    NotMapped(ObjectAddress),
    #[error("EtherCAT PDO registration failed: {0}")]
    Registration(String),
    #[error("EtherCAT master is not activated")]
    NotActivated,
    #[error("EtherCAT master is already activated")]
    AlreadyActivated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The cyclic fieldbus as seen by the mapping layers.
///
/// One cycle is `receive`, any number of reads and writes through
/// `process_image`, then `send`.
pub trait Transport {
    /// Scans the bus and returns the PDO layout of every slave, ordered by position.
    fn discover_slaves(&mut self) -> Result<Vec<SlaveDescriptor>, TransportError>;

    /// Registers every request in the process image, returning one offset per request.
    fn register_bindings(
        &mut self,
        requests: &[RegistrationRequest],
    ) -> Result<Vec<FieldOffset>, TransportError>;

    fn activate(&mut self, cycle_period: Duration) -> Result<(), TransportError>;

    fn receive(&mut self) -> Result<(), TransportError>;

    fn send(&mut self) -> Result<(), TransportError>;

    fn process_image(&mut self) -> Result<&mut [u8], TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slave() -> SlaveDescriptor {
        SlaveDescriptor {
            position: 1,
            vendor_id: 0x2,
            product_code: 0x1,
            name: "test".to_string(),
            sync_groups: vec![
                SyncGroup {
                    index: 0,
                    direction: Direction::Output,
                    pdos: vec![],
                },
                SyncGroup {
                    index: 2,
                    direction: Direction::Output,
                    pdos: vec![
                        PdoDescriptor {
                            index: 0x1600,
                            entries: vec![PdoEntryDescriptor {
                                index: 0x7000,
                                sub_index: 1,
                                bit_length: 1,
                            }],
                        },
                        PdoDescriptor {
                            index: 0x1601,
                            entries: vec![PdoEntryDescriptor {
                                index: 0x7010,
                                sub_index: 1,
                                bit_length: 16,
                            }],
                        },
                    ],
                },
                SyncGroup {
                    index: 3,
                    direction: Direction::Input,
                    pdos: vec![PdoDescriptor {
                        index: 0x1a00,
                        entries: vec![PdoEntryDescriptor {
                            index: 0x6000,
                            sub_index: 1,
                            bit_length: 8,
                        }],
                    }],
                },
            ],
        }
    }

    #[test]
    fn sync_group_skips_empty_managers() {
        let slave = slave();
        assert_eq!(slave.sync_group(Direction::Output).unwrap().index, 2);
        assert_eq!(slave.sync_group(Direction::Input).unwrap().index, 3);
    }

    #[test]
    fn bit_length_searches_every_pdo_of_the_direction() {
        let slave = slave();
        assert_eq!(slave.bit_length(0x7000, 1, Direction::Output), 1);
        assert_eq!(slave.bit_length(0x7010, 1, Direction::Output), 16);
        assert_eq!(slave.bit_length(0x6000, 1, Direction::Input), 8);

        // wrong direction or subindex
        assert_eq!(slave.bit_length(0x6000, 1, Direction::Output), 0);
        assert_eq!(slave.bit_length(0x7010, 2, Direction::Output), 0);
    }

    #[test]
    fn dictionary_over_slave_list() {
        let slaves = vec![slave()];
        let dictionary: &[SlaveDescriptor] = &slaves;

        assert!(dictionary.contains_slave(1));
        assert!(!dictionary.contains_slave(0));
        assert_eq!(
            dictionary.bit_length(&ObjectAddress::new(1, 0x7010, 1), Direction::Output),
            16
        );
        assert_eq!(
            dictionary.bit_length(&ObjectAddress::new(0, 0x7010, 1), Direction::Output),
            0
        );
    }
}
