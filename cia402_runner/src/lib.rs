mod scheduler;
pub use scheduler::{CycleStats, CycleTask};

mod application;
pub use application::PowerSequencer;
