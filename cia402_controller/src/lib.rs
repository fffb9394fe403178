extern crate num;
#[macro_use]
extern crate num_derive;

pub mod state_machine;
pub use state_machine::{ControlWord, FsaState, ModeOfOperation, StatusWord};

mod objects;
pub use objects::{Cia402Object, ProfileSignal, CONTROL_WORD_INDEX};

pub mod drive;
pub use drive::DriveRecord;

mod controller;
pub use controller::Cia402Controller;

mod error;
pub use error::Error;
