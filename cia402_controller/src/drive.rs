//! CiA402 drive records and their per-cycle logic.
//!
//! A [`DriveRecord`] is created for every slave whose output PDOs carry the
//! control word. The record owns four slots in the caller's variable table
//! (control word, status word, mode of operation and raw target position) and
//! keeps handles on the application variables mapped through the reserved
//! `power`, `enabled`, `target` and `factor` names.

use ethercat_io::{Direction, MappingEntry, SlaveDescriptor, Value, VarHandle, VariableTable};

use crate::{
    objects::{Cia402Object, ProfileSignal, CONTROL_WORD_INDEX},
    state_machine::{
        next_control_word, parse_status_word, FsaState, ModeOfOperation, StatusWord,
    },
    Error,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveRecord {
    slave: u16,

    control_word: VarHandle,
    status_word: VarHandle,
    mode_of_operation: VarHandle,
    target_position: VarHandle,

    power_control: Option<VarHandle>,
    power_feedback: Option<VarHandle>,
    scaled_target: Option<VarHandle>,
    scale_factor: Option<VarHandle>,
}

/// One record per slave with a control word in its output PDOs, by ascending position.
pub fn discover(slaves: &[SlaveDescriptor], vars: &mut VariableTable) -> Vec<DriveRecord> {
    let mut positions: Vec<u16> = slaves
        .iter()
        .filter(|slave| {
            slave
                .entries(Direction::Output)
                .any(|entry| entry.index == CONTROL_WORD_INDEX)
        })
        .map(|slave| slave.position)
        .collect();
    positions.sort_unstable();
    positions.dedup();

    positions
        .into_iter()
        .map(|slave| {
            log::info!("Found CiA402 drive on slave {}", slave);
            DriveRecord::new(slave, vars)
        })
        .collect()
}

/// Replaces the reserved-name entries by the bindings of the drive objects.
///
/// Every named entry is checked before any record is touched, so on error
/// the records keep their previous bindings. The returned list keeps the
/// order of `entries` and ends with one mode of operation output per drive.
pub fn rewrite(
    entries: &[MappingEntry],
    drives: &mut [DriveRecord],
) -> Result<Vec<MappingEntry>, Error> {
    let targets = entries
        .iter()
        .map(|entry| profile_target(entry, drives))
        .collect::<Result<Vec<_>, _>>()?;

    for drive in drives.iter_mut() {
        drive.unbind();
    }

    let mut rewritten = Vec::with_capacity(entries.len() + drives.len());
    for (entry, target) in entries.iter().zip(targets) {
        let (i, signal) = match target {
            Some(target) => target,
            None => {
                rewritten.push(entry.clone());
                continue;
            }
        };
        if entry.direction != signal.direction() {
            log::warn!(
                "\"{}\" is an {} signal, ignoring the {} direction it was mapped with",
                entry.address,
                signal.direction(),
                entry.direction
            );
        }
        if let Some(replacement) = drives[i].bind(signal, entry.variable) {
            rewritten.push(replacement);
        }
    }

    rewritten.extend(drives.iter().map(|drive| {
        MappingEntry::output(
            drive.mode_of_operation,
            Cia402Object::ModeOfOperation.address(drive.slave),
        )
    }));

    Ok(rewritten)
}

// index of the drive record and signal for a reserved-name entry
fn profile_target(
    entry: &MappingEntry,
    drives: &[DriveRecord],
) -> Result<Option<(usize, ProfileSignal)>, Error> {
    let signal = match entry.address.name().and_then(ProfileSignal::from_name) {
        Some(signal) => signal,
        None => return Ok(None),
    };
    let slave = entry.address.slave();

    match drives.iter().position(|d| d.slave == slave) {
        Some(i) => Ok(Some((i, signal))),
        None => {
            log::error!("Slave {} is not a CiA402 drive", slave);
            Err(Error::NotACiA402Slave {
                slave,
                name: signal.name().to_string(),
            })
        }
    }
}

pub fn publish(drives: &[DriveRecord], vars: &mut VariableTable) {
    for drive in drives {
        drive.publish(vars);
    }
}

pub fn retrieve(drives: &[DriveRecord], vars: &mut VariableTable) {
    for drive in drives {
        drive.retrieve(vars);
    }
}

impl DriveRecord {
    fn new(slave: u16, vars: &mut VariableTable) -> Self {
        Self {
            slave,
            control_word: vars.declare(Value::U16(0)),
            status_word: vars.declare(Value::U16(0)),
            mode_of_operation: vars.declare(Value::I8(ModeOfOperation::default().code())),
            target_position: vars.declare(Value::I32(0)),
            power_control: None,
            power_feedback: None,
            scaled_target: None,
            scale_factor: None,
        }
    }

    pub fn slave(&self) -> u16 {
        self.slave
    }

    pub fn control_word_handle(&self) -> VarHandle {
        self.control_word
    }

    pub fn status_word_handle(&self) -> VarHandle {
        self.status_word
    }

    pub fn mode_of_operation_handle(&self) -> VarHandle {
        self.mode_of_operation
    }

    pub fn target_position_handle(&self) -> VarHandle {
        self.target_position
    }

    pub fn power_control(&self) -> Option<VarHandle> {
        self.power_control
    }

    pub fn power_feedback(&self) -> Option<VarHandle> {
        self.power_feedback
    }

    pub fn scaled_target(&self) -> Option<VarHandle> {
        self.scaled_target
    }

    pub fn scale_factor(&self) -> Option<VarHandle> {
        self.scale_factor
    }

    pub fn control_word(&self, vars: &VariableTable) -> u16 {
        vars.get(self.control_word)
            .map(|v| v.to_raw() as u16)
            .unwrap_or(0)
    }

    pub fn status_word(&self, vars: &VariableTable) -> u16 {
        vars.get(self.status_word)
            .map(|v| v.to_raw() as u16)
            .unwrap_or(0)
    }

    pub fn target_position(&self, vars: &VariableTable) -> i32 {
        vars.get(self.target_position)
            .map(|v| v.to_raw() as i32)
            .unwrap_or(0)
    }

    pub fn mode_of_operation(&self, vars: &VariableTable) -> Option<ModeOfOperation> {
        vars.get(self.mode_of_operation)
            .and_then(|v| ModeOfOperation::from_code(v.to_raw() as i8))
    }

    pub fn set_mode_of_operation(&self, vars: &mut VariableTable, mode: ModeOfOperation) {
        vars.set(self.mode_of_operation, Value::I8(mode.code()));
    }

    /// Decoded drive state, `None` for a status word that encodes no state.
    pub fn state(&self, vars: &VariableTable) -> Option<FsaState> {
        FsaState::decode(self.status_word(vars))
    }

    pub(crate) fn unbind(&mut self) {
        self.power_control = None;
        self.power_feedback = None;
        self.scaled_target = None;
        self.scale_factor = None;
    }

    fn bind(&mut self, signal: ProfileSignal, variable: VarHandle) -> Option<MappingEntry> {
        match signal {
            ProfileSignal::Power => {
                self.power_control = Some(variable);
                Some(MappingEntry::output(
                    self.control_word,
                    Cia402Object::ControlWord.address(self.slave),
                ))
            }
            ProfileSignal::Enabled => {
                self.power_feedback = Some(variable);
                Some(MappingEntry::input(
                    self.status_word,
                    Cia402Object::StatusWord.address(self.slave),
                ))
            }
            ProfileSignal::Target => {
                self.scaled_target = Some(variable);
                Some(MappingEntry::output(
                    self.target_position,
                    Cia402Object::TargetPosition.address(self.slave),
                ))
            }
            // read every cycle, never on the wire
            ProfileSignal::Factor => {
                self.scale_factor = Some(variable);
                None
            }
        }
    }

    /// Requested power, only honoured while the drive reports voltage.
    fn power(&self, status_word: u16, vars: &VariableTable) -> bool {
        let voltage = StatusWord::from_bits_retain(status_word).contains(StatusWord::VOLTAGE_ENABLED);
        match self.power_control.and_then(|h| vars.bool(h)) {
            Some(power) => voltage && power,
            None => false,
        }
    }

    fn raw_target(&self, vars: &VariableTable) -> Option<i32> {
        let scaled = self.scaled_target.and_then(|h| vars.f64(h))?;
        match self.scale_factor.and_then(|h| vars.f64(h)) {
            Some(factor) => Some((scaled * factor) as i32),
            None => Some(scaled as i32),
        }
    }

    /// Computes the next control word and raw target position.
    pub fn publish(&self, vars: &mut VariableTable) {
        let status_word = self.status_word(vars);
        let control_word = self.control_word(vars);
        let power = self.power(status_word, vars);

        let next = next_control_word(status_word, control_word, power);
        if next != control_word {
            log::debug!(
                "Slave {}: {:?} {:?}, controlword {:#06x} -> {:#06x}",
                self.slave,
                FsaState::decode(status_word),
                parse_status_word(status_word),
                control_word,
                next
            );
        }
        vars.set(self.control_word, Value::U16(next));

        if let Some(target) = self.raw_target(vars) {
            vars.set(self.target_position, Value::I32(target));
        }
    }

    /// Updates the power feedback variable, true only while operation is enabled.
    pub fn retrieve(&self, vars: &mut VariableTable) {
        if let Some(feedback) = self.power_feedback {
            let enabled = self.state(vars) == Some(FsaState::OperationEnabled);
            vars.set(feedback, Value::Bool(enabled));
        }
    }
}

#[cfg(test)]
mod tests {
    use ethercat_io::{NetworkAddress, ObjectAddress, SimulatedSlave};

    use super::*;

    fn bus() -> Vec<SlaveDescriptor> {
        vec![
            SimulatedSlave::Cia402Drive.descriptor(2),
            SimulatedSlave::DigitalIo {
                inputs: 2,
                outputs: 2,
            }
            .descriptor(1),
            SimulatedSlave::Cia402Drive.descriptor(0),
        ]
    }

    fn named(vars: &mut VariableTable, value: Value, slave: u16, name: &str) -> MappingEntry {
        let signal = ProfileSignal::from_name(name).unwrap();
        MappingEntry::new(
            vars.declare(value),
            NetworkAddress::named(slave, name),
            signal.direction(),
        )
    }

    #[test]
    fn discover_finds_control_word_slaves_in_order() {
        let mut vars = VariableTable::new();
        let drives = discover(&bus(), &mut vars);

        let slaves: Vec<_> = drives.iter().map(|d| d.slave()).collect();
        assert_eq!(slaves, vec![0, 2]);
        // four slots per drive
        assert_eq!(vars.len(), 8);
        assert_eq!(drives[0].control_word(&vars), 0);
        assert_eq!(
            drives[0].mode_of_operation(&vars),
            Some(ModeOfOperation::CyclicSynchronousPosition)
        );
        assert_eq!(drives[1].power_control(), None);
    }

    #[test]
    fn rewrite_replaces_reserved_names() {
        let mut vars = VariableTable::new();
        let mut drives = discover(&bus(), &mut vars);

        let passthrough = MappingEntry::input(
            vars.declare(Value::Bool(false)),
            ObjectAddress::new(1, 0x6000, 1),
        );
        let entries = vec![
            named(&mut vars, Value::Bool(false), 2, "power"),
            passthrough.clone(),
            named(&mut vars, Value::Bool(false), 2, "enabled"),
            named(&mut vars, Value::F64(0.0), 2, "target"),
            named(&mut vars, Value::F64(100.0), 2, "factor"),
        ];

        let rewritten = rewrite(&entries, &mut drives).unwrap();
        let drive = &drives[1];

        assert_eq!(
            rewritten,
            vec![
                MappingEntry::output(
                    drive.control_word_handle(),
                    ObjectAddress::new(2, 0x6040, 0)
                ),
                passthrough,
                MappingEntry::input(drive.status_word_handle(), ObjectAddress::new(2, 0x6041, 0)),
                MappingEntry::output(
                    drive.target_position_handle(),
                    ObjectAddress::new(2, 0x607A, 0)
                ),
                MappingEntry::output(
                    drives[0].mode_of_operation_handle(),
                    ObjectAddress::new(0, 0x6060, 0)
                ),
                MappingEntry::output(
                    drive.mode_of_operation_handle(),
                    ObjectAddress::new(2, 0x6060, 0)
                ),
            ]
        );
        assert_eq!(drive.power_control(), Some(entries[0].variable));
        assert_eq!(drive.power_feedback(), Some(entries[2].variable));
        assert_eq!(drive.scaled_target(), Some(entries[3].variable));
        assert_eq!(drive.scale_factor(), Some(entries[4].variable));
        assert_eq!(drives[0].power_control(), None);
    }

    #[test]
    fn rewrite_leaves_unknown_names_to_the_registry() {
        let mut vars = VariableTable::new();
        let mut drives = discover(&bus(), &mut vars);
        let entry = MappingEntry::output(
            vars.declare(Value::I32(0)),
            NetworkAddress::named(0, "velocity"),
        );

        let rewritten = rewrite(&[entry.clone()], &mut drives).unwrap();
        assert_eq!(rewritten[0], entry);
        assert_eq!(rewritten.len(), 3);
    }

    #[test]
    fn rewrite_rejects_slaves_without_drive() {
        let mut vars = VariableTable::new();
        let slaves: Vec<_> = (0..3)
            .map(|p| SimulatedSlave::Cia402Drive.descriptor(p))
            .collect();
        let mut drives = discover(&slaves, &mut vars);

        let target = named(&mut vars, Value::F64(0.0), 0, "target");
        rewrite(&[target.clone()], &mut drives).unwrap();
        let before = drives.clone();

        let entries = vec![
            named(&mut vars, Value::Bool(false), 1, "power"),
            named(&mut vars, Value::Bool(false), 3, "power"),
        ];
        match rewrite(&entries, &mut drives) {
            Err(Error::NotACiA402Slave { slave, name }) => {
                assert_eq!(slave, 3);
                assert_eq!(name, "power");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(drives, before);
        assert_eq!(drives[0].scaled_target(), Some(target.variable));
    }

    #[test]
    fn rewrite_drops_previous_bindings() {
        let mut vars = VariableTable::new();
        let mut drives = discover(&bus(), &mut vars);

        let power = named(&mut vars, Value::Bool(false), 0, "power");
        rewrite(&[power], &mut drives).unwrap();
        assert!(drives[0].power_control().is_some());

        rewrite(&[], &mut drives).unwrap();
        assert_eq!(drives[0].power_control(), None);
    }

    fn powered_drive(vars: &mut VariableTable) -> (DriveRecord, VarHandle, VarHandle) {
        let mut drives = discover(&[SimulatedSlave::Cia402Drive.descriptor(0)], vars);
        let power = named(vars, Value::Bool(false), 0, "power");
        let enabled = named(vars, Value::Bool(false), 0, "enabled");
        rewrite(&[power.clone(), enabled.clone()], &mut drives).unwrap();
        (drives.remove(0), power.variable, enabled.variable)
    }

    #[test]
    fn publish_sequences_the_power_up() {
        let mut vars = VariableTable::new();
        let (drive, power, _) = powered_drive(&mut vars);
        let status = drive.status_word_handle();

        vars.set(status, Value::U16(0x0250));
        drive.publish(&mut vars);
        assert_eq!(drive.control_word(&vars), 0x0006);

        // no power requested: switch on and stay there
        vars.set(status, Value::U16(0x0231));
        drive.publish(&mut vars);
        assert_eq!(drive.control_word(&vars), 0x0007);
        vars.set(status, Value::U16(0x0233));
        drive.publish(&mut vars);
        assert_eq!(drive.control_word(&vars), 0x0007);

        vars.set(power, Value::Bool(true));
        drive.publish(&mut vars);
        assert_eq!(drive.control_word(&vars), 0x000F);

        // power is ignored without voltage
        vars.set(status, Value::U16(0x0223));
        vars.set(drive.control_word_handle(), Value::U16(0x0007));
        drive.publish(&mut vars);
        assert_eq!(drive.control_word(&vars), 0x0007);
    }

    #[test]
    fn publish_without_power_binding_acts_as_unpowered() {
        let mut vars = VariableTable::new();
        let mut drives = discover(&[SimulatedSlave::Cia402Drive.descriptor(0)], &mut vars);
        rewrite(&[], &mut drives).unwrap();
        let drive = &drives[0];

        vars.set(drive.status_word_handle(), Value::U16(0x0237));
        vars.set(drive.control_word_handle(), Value::U16(0x000F));
        drive.publish(&mut vars);
        assert_eq!(drive.control_word(&vars), 0x0007);
    }

    #[test]
    fn publish_is_idempotent() {
        let mut vars = VariableTable::new();
        let (drive, power, _) = powered_drive(&mut vars);
        vars.set(power, Value::Bool(true));

        for status in [0x0040, 0x0231, 0x0233, 0x0237, 0x0208, 0x0217, 0x0000] {
            vars.set(drive.status_word_handle(), Value::U16(status));
            drive.publish(&mut vars);
            let first = drive.control_word(&vars);
            drive.publish(&mut vars);
            assert_eq!(drive.control_word(&vars), first, "statusword {:#06x}", status);
        }
    }

    #[test]
    fn publish_scales_the_target() {
        let mut vars = VariableTable::new();
        let mut drives = discover(&[SimulatedSlave::Cia402Drive.descriptor(0)], &mut vars);
        let target = named(&mut vars, Value::F64(12.0), 0, "target");
        let factor = named(&mut vars, Value::F64(100.0), 0, "factor");
        rewrite(&[target.clone(), factor], &mut drives).unwrap();
        let drive = &drives[0];

        drive.publish(&mut vars);
        assert_eq!(drive.target_position(&vars), 1200);

        vars.set(target.variable, Value::F64(-0.019));
        drive.publish(&mut vars);
        assert_eq!(drive.target_position(&vars), -1);
    }

    #[test]
    fn publish_without_factor_copies_the_target() {
        let mut vars = VariableTable::new();
        let mut drives = discover(&[SimulatedSlave::Cia402Drive.descriptor(0)], &mut vars);
        let target = named(&mut vars, Value::F64(1200.0), 0, "target");
        rewrite(&[target], &mut drives).unwrap();

        drives[0].publish(&mut vars);
        assert_eq!(drives[0].target_position(&vars), 1200);

        // no target bound: left alone
        rewrite(&[], &mut drives).unwrap();
        vars.set(drives[0].target_position_handle(), Value::I32(-5));
        drives[0].publish(&mut vars);
        assert_eq!(drives[0].target_position(&vars), -5);
    }

    #[test]
    fn retrieve_reports_operation_enabled_only() {
        let mut vars = VariableTable::new();
        let (drive, _, enabled) = powered_drive(&mut vars);

        vars.set(drive.status_word_handle(), Value::U16(0x0237));
        drive.retrieve(&mut vars);
        assert_eq!(vars.bool(enabled), Some(true));

        for status in [0x0233, 0x0231, 0x0250, 0x0000, 0x0217, 0x0208, 0x021F] {
            vars.set(drive.status_word_handle(), Value::U16(status));
            drive.retrieve(&mut vars);
            assert_eq!(vars.bool(enabled), Some(false), "statusword {:#06x}", status);
        }
    }

    #[test]
    fn mode_of_operation_can_be_changed() {
        let mut vars = VariableTable::new();
        let drives = discover(&[SimulatedSlave::Cia402Drive.descriptor(0)], &mut vars);

        drives[0].set_mode_of_operation(&mut vars, ModeOfOperation::CyclicSynchronousVelocity);
        assert_eq!(
            vars.get(drives[0].mode_of_operation_handle()),
            Some(Value::I8(9))
        );
    }
}
