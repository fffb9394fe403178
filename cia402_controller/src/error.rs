use ethercat_io::{MappingError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("slave {slave} has no CiA402 control word, \"{name}\" cannot be mapped")]
    NotACiA402Slave { slave: u16, name: String },
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
