//! In-memory bus used for tests and for running without hardware.
//!
//! Registered objects are laid out one after the other in a single process
//! image; single bit objects are packed, everything else starts on a byte
//! boundary. With drive emulation enabled every slave exposing a control word
//! answers like a CiA402 drive: it reads the control word written during the
//! previous cycle on `receive` and reports its new state in the status word.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use super::{
    Direction, FieldOffset, PdoDescriptor, PdoEntryDescriptor, RegistrationRequest,
    SlaveDescriptor, SyncGroup, Transport, TransportError,
};
use crate::{process_image, ObjectAddress, ObjectDictionary};

const CONTROL_WORD: u16 = 0x6040;
const STATUS_WORD: u16 = 0x6041;
const MODE_OF_OPERATION: u16 = 0x6060;
const MODE_OF_OPERATION_DISPLAY: u16 = 0x6061;
const POSITION_ACTUAL_VALUE: u16 = 0x6064;
const TARGET_POSITION: u16 = 0x607A;

const REMOTE: u16 = 0x0200;
const FAULT_RESET: u16 = 0x0080;

// vendor and product of the simulated devices, arbitrary
const SIMULATION_VENDOR_ID: u32 = 0x0000_0000;
const DRIVE_PRODUCT_CODE: u32 = 0x0000_0402;
const DIGITAL_IO_PRODUCT_CODE: u32 = 0x0000_1001;

/// Kind of device to put on a simulated bus, as found in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimulatedSlave {
    /// Cyclic synchronous position drive.
    Cia402Drive,
    /// Terminal with single bit inputs (0x6000 + 0x10 * n : 1) and outputs (0x7000 + 0x10 * n : 1).
    DigitalIo { inputs: u8, outputs: u8 },
}

impl SimulatedSlave {
    pub fn descriptor(&self, position: u16) -> SlaveDescriptor {
        match *self {
            SimulatedSlave::Cia402Drive => SlaveDescriptor {
                position,
                vendor_id: SIMULATION_VENDOR_ID,
                product_code: DRIVE_PRODUCT_CODE,
                name: "Simulated CiA402 drive".to_string(),
                sync_groups: vec![
                    SyncGroup {
                        index: 2,
                        direction: Direction::Output,
                        pdos: vec![PdoDescriptor {
                            index: 0x1600,
                            entries: vec![
                                entry(CONTROL_WORD, 0, 16),
                                entry(TARGET_POSITION, 0, 32),
                                entry(MODE_OF_OPERATION, 0, 8),
                            ],
                        }],
                    },
                    SyncGroup {
                        index: 3,
                        direction: Direction::Input,
                        pdos: vec![PdoDescriptor {
                            index: 0x1a00,
                            entries: vec![
                                entry(STATUS_WORD, 0, 16),
                                entry(POSITION_ACTUAL_VALUE, 0, 32),
                                entry(MODE_OF_OPERATION_DISPLAY, 0, 8),
                            ],
                        }],
                    },
                ],
            },
            SimulatedSlave::DigitalIo { inputs, outputs } => SlaveDescriptor {
                position,
                vendor_id: SIMULATION_VENDOR_ID,
                product_code: DIGITAL_IO_PRODUCT_CODE,
                name: format!("Simulated digital I/O {}DI/{}DO", inputs, outputs),
                sync_groups: vec![
                    SyncGroup {
                        index: 0,
                        direction: Direction::Output,
                        pdos: (0..outputs as u16)
                            .map(|n| PdoDescriptor {
                                index: 0x1600 + n,
                                entries: vec![entry(0x7000 + 0x10 * n, 1, 1)],
                            })
                            .collect(),
                    },
                    SyncGroup {
                        index: 1,
                        direction: Direction::Input,
                        pdos: (0..inputs as u16)
                            .map(|n| PdoDescriptor {
                                index: 0x1a00 + n,
                                entries: vec![entry(0x6000 + 0x10 * n, 1, 1)],
                            })
                            .collect(),
                    },
                ],
            },
        }
    }
}

fn entry(index: u16, sub_index: u8, bit_length: u8) -> PdoEntryDescriptor {
    PdoEntryDescriptor {
        index,
        sub_index,
        bit_length,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    Fault,
}

impl DeviceState {
    fn status_word(self) -> u16 {
        REMOTE
            | match self {
                DeviceState::NotReadyToSwitchOn => 0x0000,
                DeviceState::SwitchOnDisabled => 0x0040,
                DeviceState::ReadyToSwitchOn => 0x0031,
                DeviceState::SwitchedOn => 0x0033,
                DeviceState::OperationEnabled => 0x0037,
                DeviceState::QuickStopActive => 0x0017,
                DeviceState::Fault => 0x0008,
            }
    }

    // device side of the CiA402 power drive state machine, one transition per cycle
    fn next(self, control_word: u16, previous_control_word: u16) -> Self {
        let switch_on = control_word & 0x0001 != 0;
        let enable_voltage = control_word & 0x0002 != 0;
        let quick_stop = control_word & 0x0004 != 0;
        let enable_operation = control_word & 0x0008 != 0;
        let fault_reset =
            control_word & FAULT_RESET != 0 && previous_control_word & FAULT_RESET == 0;

        match self {
            DeviceState::NotReadyToSwitchOn => DeviceState::SwitchOnDisabled,
            DeviceState::Fault if fault_reset => DeviceState::SwitchOnDisabled,
            DeviceState::Fault => DeviceState::Fault,
            DeviceState::QuickStopActive => DeviceState::SwitchOnDisabled,
            _ if !enable_voltage => DeviceState::SwitchOnDisabled,
            DeviceState::OperationEnabled if !quick_stop => DeviceState::QuickStopActive,
            _ if !quick_stop => DeviceState::SwitchOnDisabled,
            DeviceState::SwitchOnDisabled if !switch_on && control_word & FAULT_RESET == 0 => {
                DeviceState::ReadyToSwitchOn
            }
            DeviceState::ReadyToSwitchOn if switch_on => DeviceState::SwitchedOn,
            DeviceState::SwitchedOn | DeviceState::OperationEnabled if !switch_on => {
                DeviceState::ReadyToSwitchOn
            }
            DeviceState::SwitchedOn if enable_operation => DeviceState::OperationEnabled,
            DeviceState::OperationEnabled if !enable_operation => DeviceState::SwitchedOn,
            state => state,
        }
    }
}

#[derive(Debug, Clone)]
struct EmulatedDrive {
    state: DeviceState,
    last_control_word: u16,
    position: i32,
}

#[derive(Debug)]
pub struct SimulatedTransport {
    slaves: Vec<SlaveDescriptor>,
    layout: HashMap<(ObjectAddress, Direction), (FieldOffset, u8)>,
    next_bit: usize,
    image: Vec<u8>,
    drives: Option<HashMap<u16, EmulatedDrive>>,
    cycle_period: Option<Duration>,
    cycles: u64,
}

impl SimulatedTransport {
    pub fn new(mut slaves: Vec<SlaveDescriptor>) -> Self {
        slaves.sort_by_key(|s| s.position);
        Self {
            slaves,
            layout: HashMap::new(),
            next_bit: 0,
            image: Vec::new(),
            drives: None,
            cycle_period: None,
            cycles: 0,
        }
    }

    /// Bus with one device of the given kind per position, starting at 0.
    pub fn from_slaves(kinds: &[SimulatedSlave]) -> Self {
        Self::new(
            kinds
                .iter()
                .enumerate()
                .map(|(position, kind)| kind.descriptor(position as u16))
                .collect(),
        )
    }

    /// Makes every slave with a control word behave like a CiA402 drive.
    pub fn with_drive_emulation(mut self) -> Self {
        let drives = self
            .slaves
            .iter()
            .filter(|s| s.bit_length(CONTROL_WORD, 0, Direction::Output) != 0)
            .map(|s| {
                (
                    s.position,
                    EmulatedDrive {
                        state: DeviceState::NotReadyToSwitchOn,
                        last_control_word: 0,
                        position: 0,
                    },
                )
            })
            .collect();
        self.drives = Some(drives);
        self
    }

    pub fn is_active(&self) -> bool {
        self.cycle_period.is_some()
    }

    pub fn cycle_period(&self) -> Option<Duration> {
        self.cycle_period
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn offset_of(&self, address: ObjectAddress, direction: Direction) -> Option<FieldOffset> {
        self.layout.get(&(address, direction)).map(|(o, _)| *o)
    }

    /// Status word the emulated drive reports, `None` if the slave is no emulated drive.
    pub fn drive_status_word(&self, slave: u16) -> Option<u16> {
        self.drives
            .as_ref()
            .and_then(|drives| drives.get(&slave))
            .map(|d| d.state.status_word())
    }

    /// Puts an emulated drive into the Fault state. It leaves it on a fault reset edge.
    pub fn inject_fault(&mut self, slave: u16) -> bool {
        match self.drives.as_mut().and_then(|drives| drives.get_mut(&slave)) {
            Some(drive) => {
                log::warn!("Injecting fault on simulated slave {}", slave);
                drive.state = DeviceState::Fault;
                true
            }
            None => false,
        }
    }

    fn field(&self, slave: u16, index: u16, direction: Direction) -> Option<(FieldOffset, u8)> {
        self.layout
            .get(&(ObjectAddress::new(slave, index, 0), direction))
            .copied()
    }

    fn step_drives(&mut self) {
        let mut drives = match self.drives.take() {
            Some(drives) => drives,
            None => return,
        };

        for (&slave, drive) in drives.iter_mut() {
            let control_word = self
                .field(slave, CONTROL_WORD, Direction::Output)
                .and_then(|(offset, len)| process_image::read_field(&self.image, offset, len))
                .unwrap_or(0) as u16;

            let state = drive.state.next(control_word, drive.last_control_word);
            if state != drive.state {
                log::debug!(
                    "Simulated drive {}: {:?} -> {:?} (controlword {:#06x})",
                    slave,
                    drive.state,
                    state,
                    control_word
                );
            }
            drive.state = state;
            drive.last_control_word = control_word;

            if drive.state == DeviceState::OperationEnabled {
                if let Some(target) = self
                    .field(slave, TARGET_POSITION, Direction::Output)
                    .and_then(|(offset, len)| process_image::read_field(&self.image, offset, len))
                {
                    drive.position = target as i32;
                }
            }

            if let Some((offset, len)) = self.field(slave, STATUS_WORD, Direction::Input) {
                process_image::write_field(
                    &mut self.image,
                    offset,
                    len,
                    drive.state.status_word() as u32,
                );
            }
            if let Some((offset, len)) = self.field(slave, POSITION_ACTUAL_VALUE, Direction::Input)
            {
                process_image::write_field(&mut self.image, offset, len, drive.position as u32);
            }
            if let (Some((mode_out, out_len)), Some((mode_in, in_len))) = (
                self.field(slave, MODE_OF_OPERATION, Direction::Output),
                self.field(slave, MODE_OF_OPERATION_DISPLAY, Direction::Input),
            ) {
                if let Some(mode) = process_image::read_field(&self.image, mode_out, out_len) {
                    process_image::write_field(&mut self.image, mode_in, in_len, mode);
                }
            }
        }

        self.drives = Some(drives);
    }
}

impl Transport for SimulatedTransport {
    fn discover_slaves(&mut self) -> Result<Vec<SlaveDescriptor>, TransportError> {
        Ok(self.slaves.clone())
    }

    fn register_bindings(
        &mut self,
        requests: &[RegistrationRequest],
    ) -> Result<Vec<FieldOffset>, TransportError> {
        if self.is_active() {
            return Err(TransportError::AlreadyActivated);
        }

        // validate everything first so that a failed call leaves no trace
        let mut lengths = Vec::with_capacity(requests.len());
        for request in requests {
            if !self.slaves.as_slice().contains_slave(request.address.slave) {
                return Err(TransportError::SlaveNotFound(request.address.slave));
            }
            match self
                .slaves
                .as_slice()
                .bit_length(&request.address, request.direction)
            {
                0 => return Err(TransportError::NotMapped(request.address)),
                len => lengths.push(len),
            }
        }

        let mut offsets = Vec::with_capacity(requests.len());
        for (request, bit_length) in requests.iter().zip(lengths) {
            let key = (request.address, request.direction);
            if let Some((offset, _)) = self.layout.get(&key) {
                offsets.push(*offset);
                continue;
            }

            if bit_length != 1 {
                self.next_bit = self.next_bit.div_ceil(8) * 8;
            }
            let offset = FieldOffset {
                byte: self.next_bit / 8,
                bit: (self.next_bit % 8) as u8,
            };
            self.next_bit += bit_length as usize;
            self.layout.insert(key, (offset, bit_length));
            offsets.push(offset);
        }

        self.image.resize(self.next_bit.div_ceil(8), 0);
        Ok(offsets)
    }

    fn activate(&mut self, cycle_period: Duration) -> Result<(), TransportError> {
        if self.is_active() {
            return Err(TransportError::AlreadyActivated);
        }
        log::info!(
            "Simulated master activated: {} bytes of process data, cycle {:?}",
            self.image.len(),
            cycle_period
        );
        self.cycle_period = Some(cycle_period);
        Ok(())
    }

    fn receive(&mut self) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::NotActivated);
        }
        self.step_drives();
        Ok(())
    }

    fn send(&mut self) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::NotActivated);
        }
        self.cycles += 1;
        Ok(())
    }

    fn process_image(&mut self) -> Result<&mut [u8], TransportError> {
        if !self.is_active() {
            return Err(TransportError::NotActivated);
        }
        Ok(&mut self.image)
    }
}
