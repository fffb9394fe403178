//! Binding of process variables to PDO entries.
//!
//! A mapping list is resolved against the discovered PDO layout
//! ([`build`]), registered with the transport in a single call, and the
//! resulting offsets are kept until the next registration. Every cycle the
//! registry copies the inbound fields into their variables and the variables
//! of the outbound fields into the process image.

use thiserror::Error;

use crate::{
    process_image, Direction, FieldOffset, NetworkAddress, ObjectAddress, ObjectDictionary,
    RegistrationRequest, Transport, TransportError, VarHandle, VariableTable,
};

/// Bit widths the cyclic copy knows how to exchange.
pub const SUPPORTED_WIDTHS: [u8; 4] = [1, 8, 16, 32];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub variable: VarHandle,
    pub address: NetworkAddress,
    pub direction: Direction,
}

impl MappingEntry {
    pub fn new(variable: VarHandle, address: NetworkAddress, direction: Direction) -> Self {
        Self {
            variable,
            address,
            direction,
        }
    }

    pub fn input(variable: VarHandle, address: impl Into<NetworkAddress>) -> Self {
        Self::new(variable, address.into(), Direction::Input)
    }

    pub fn output(variable: VarHandle, address: impl Into<NetworkAddress>) -> Self {
        Self::new(variable, address.into(), Direction::Output)
    }
}

/// A mapping entry checked against the object dictionary, not yet placed in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField {
    pub variable: VarHandle,
    pub byte_size: usize,
    pub address: ObjectAddress,
    pub direction: Direction,
    pub bit_length: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundField {
    pub field: ResolvedField,
    pub offset: FieldOffset,
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("object {address} is not in the {direction} PDOs of slave {}", .address.slave)]
    UnresolvedObject {
        address: ObjectAddress,
        direction: Direction,
    },
    #[error("variable bound to {address} holds {byte_size} bytes, the object is {bit_length} bits wide")]
    UndersizedBinding {
        address: ObjectAddress,
        byte_size: usize,
        bit_length: u8,
    },
    #[error("object {address} is {bit_length} bits wide, only 1, 8, 16 and 32 bit objects can be exchanged")]
    UnsupportedWidth { address: ObjectAddress, bit_length: u8 },
    #[error("cannot find EtherCAT slave {slave}")]
    UnknownSlave { slave: u16 },
    #[error("\"{0}\" does not name an object")]
    UnknownName(NetworkAddress),
    #[error("variable #{0} is not declared")]
    UnknownVariable(usize),
    #[error("object {address} at byte {byte} lies outside the {len} byte process image")]
    OutsideImage {
        address: ObjectAddress,
        byte: usize,
        len: usize,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Resolves every entry, in order, against the discovered object dictionary.
///
/// Fails on the first entry that cannot be exchanged; nothing is returned for
/// the entries before it.
pub fn build<D: ObjectDictionary + ?Sized>(
    entries: &[MappingEntry],
    vars: &VariableTable,
    dictionary: &D,
) -> Result<Vec<ResolvedField>, MappingError> {
    entries
        .iter()
        .map(|entry| resolve(entry, vars, dictionary))
        .collect()
}

fn resolve<D: ObjectDictionary + ?Sized>(
    entry: &MappingEntry,
    vars: &VariableTable,
    dictionary: &D,
) -> Result<ResolvedField, MappingError> {
    let address = match &entry.address {
        NetworkAddress::Object(address) => *address,
        named => return Err(MappingError::UnknownName(named.clone())),
    };

    let byte_size = vars
        .get(entry.variable)
        .map(|v| v.byte_size())
        .ok_or(MappingError::UnknownVariable(entry.variable.index()))?;

    if !dictionary.contains_slave(address.slave) {
        return Err(MappingError::UnknownSlave {
            slave: address.slave,
        });
    }

    let bit_length = dictionary.bit_length(&address, entry.direction);
    if bit_length == 0 {
        return Err(MappingError::UnresolvedObject {
            address,
            direction: entry.direction,
        });
    }
    if !SUPPORTED_WIDTHS.contains(&bit_length) {
        return Err(MappingError::UnsupportedWidth {
            address,
            bit_length,
        });
    }
    if byte_size * 8 < bit_length as usize {
        return Err(MappingError::UndersizedBinding {
            address,
            byte_size,
            bit_length,
        });
    }

    Ok(ResolvedField {
        variable: entry.variable,
        byte_size,
        address,
        direction: entry.direction,
        bit_length,
    })
}

#[derive(Debug, Default)]
pub struct MappingRegistry {
    inputs: Vec<BoundField>,
    outputs: Vec<BoundField>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current bindings with `entries`.
    ///
    /// On error the registry is left empty and the transport has not been
    /// asked to register anything, unless the transport itself failed.
    pub fn register<D, T>(
        &mut self,
        entries: &[MappingEntry],
        vars: &VariableTable,
        dictionary: &D,
        transport: &mut T,
    ) -> Result<(), MappingError>
    where
        D: ObjectDictionary + ?Sized,
        T: Transport + ?Sized,
    {
        self.clear();

        let fields = build(entries, vars, dictionary).map_err(|e| {
            log::error!("EtherCAT mapping failed: {}", e);
            e
        })?;

        let requests: Vec<RegistrationRequest> = fields
            .iter()
            .map(|f| RegistrationRequest {
                address: f.address,
                direction: f.direction,
            })
            .collect();
        let offsets = transport.register_bindings(&requests).map_err(|e| {
            log::error!("EtherCAT PDO registration failed: {}", e);
            e
        })?;
        if offsets.len() != fields.len() {
            return Err(TransportError::Registration(format!(
                "{} offsets returned for {} entries",
                offsets.len(),
                fields.len()
            ))
            .into());
        }

        for (field, offset) in fields.into_iter().zip(offsets) {
            log::debug!(
                " - {} {} : byte {} bit {}, bit length: {}",
                field.direction,
                field.address,
                offset.byte,
                offset.bit,
                field.bit_length
            );
            let bound = BoundField { field, offset };
            match field.direction {
                Direction::Input => self.inputs.push(bound),
                Direction::Output => self.outputs.push(bound),
            }
        }
        log::info!(
            "Registered {} input and {} output PDO entries",
            self.inputs.len(),
            self.outputs.len()
        );

        Ok(())
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }

    pub fn inputs(&self) -> &[BoundField] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[BoundField] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that every bound field lies inside an image of `len` bytes.
    pub fn check_image(&self, len: usize) -> Result<(), MappingError> {
        match self
            .inputs
            .iter()
            .chain(&self.outputs)
            .find(|b| !process_image::fits(len, b.offset, b.field.bit_length))
        {
            Some(b) => Err(MappingError::OutsideImage {
                address: b.field.address,
                byte: b.offset.byte,
                len,
            }),
            None => Ok(()),
        }
    }

    /// Copies the inbound fields of the image into their variables.
    pub fn apply_inbound(&self, image: &[u8], vars: &mut VariableTable) {
        for bound in &self.inputs {
            let raw = match process_image::read_field(image, bound.offset, bound.field.bit_length)
            {
                Some(raw) => raw,
                None => continue,
            };
            if let Some(value) = vars.get_mut(bound.field.variable) {
                value.store_raw(raw, bound.field.bit_length);
            }
        }
    }

    /// Copies the variables of the outbound fields into the image.
    pub fn apply_outbound(&self, image: &mut [u8], vars: &VariableTable) {
        for bound in &self.outputs {
            if let Some(value) = vars.get(bound.field.variable) {
                process_image::write_field(
                    image,
                    bound.offset,
                    bound.field.bit_length,
                    value.to_raw(),
                );
            }
        }
    }

    pub fn apply(&self, direction: Direction, image: &mut [u8], vars: &mut VariableTable) {
        match direction {
            Direction::Input => self.apply_inbound(image, vars),
            Direction::Output => self.apply_outbound(image, vars),
        }
    }
}
