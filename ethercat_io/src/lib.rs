pub mod address;
pub use address::{AddressError, NetworkAddress, ObjectAddress};

pub mod config;
pub use config::{Config, ConfigError};

pub mod registry;
pub use registry::{BoundField, MappingEntry, MappingError, MappingRegistry, ResolvedField};

pub mod transport;
pub use transport::{
    Direction, FieldOffset, ObjectDictionary, RegistrationRequest, SimulatedSlave, SimulatedTransport,
    SlaveDescriptor, Transport, TransportError,
};

pub mod variables;
pub use variables::{Value, VarHandle, VariableTable};

pub mod process_image;
