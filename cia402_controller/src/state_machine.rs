use bitflags::bitflags;

bitflags! {
    /// Controlword (0x6040) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlWord: u16 {
        const SWITCH_ON = 0x0001;
        const ENABLE_VOLTAGE = 0x0002;
        const QUICK_STOP = 0x0004;
        const ENABLE_OPERATION = 0x0008;
        const FAULT_RESET = 0x0080;
        const HALT = 0x0100;
    }
}

bitflags! {
    /// Statusword (0x6041) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusWord: u16 {
        const READY_TO_SWITCH_ON = 0x0001;
        const SWITCHED_ON = 0x0002;
        const OPERATION_ENABLED = 0x0004;
        const FAULT = 0x0008;
        const VOLTAGE_ENABLED = 0x0010;
        const QUICK_STOP = 0x0020;
        const SWITCH_ON_DISABLED = 0x0040;
        const WARNING = 0x0080;
        const REMOTE = 0x0200;
        const TARGET_REACHED = 0x0400;
        const INTERNAL_LIMIT_ACTIVE = 0x0800;
    }
}

#[derive(FromPrimitive, Debug, PartialEq)]
pub enum StatusBit {
    ReadyToSwitchOn = 0,
    SwitchedOn = 1,
    OperationEnabled = 2,
    Fault = 3,
    VoltageEnabled = 4,
    QuickStop = 5,
    SwitchedOnDisabled = 6,
    Warning = 7,
    ManufacturerSpecific8 = 8,
    Remote = 9,
    TargetReached = 10,
    InternalLimitActive = 11,
    OperatingModeSpecific12 = 12,
    OperatingModeSpecific13 = 13,
    ManufacturerSpecific14 = 14,
    ManufacturerSpecific15 = 15,
}

pub fn parse_status_word(status: u16) -> Vec<StatusBit> {
    (0..16)
        .filter(|i| status & (1 << i) != 0)
        .filter_map(|i| num::FromPrimitive::from_u8(i as u8))
        .collect()
}

/// Bits of the statusword that encode the drive state.
pub const FSA_MASK: u16 = 0x006F;

/// Power drive system states (CiA402 table 30, state coding).
///
/// ```text
/// xxxx xxxx x0xx 0000 | Not ready to switch on
/// xxxx xxxx x1xx 0000 | Switch on disabled
/// xxxx xxxx x01x 0001 | Ready to switch on
/// xxxx xxxx x01x 0011 | Switched on
/// xxxx xxxx x01x 0111 | Operation enabled
/// xxxx xxxx x00x 0111 | Quick stop active
/// xxxx xxxx x0xx 1111 | Fault reaction active
/// xxxx xxxx x0xx 1000 | Fault
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsaState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
}

impl FsaState {
    /// `None` for bit patterns that are not a state.
    pub fn decode(status_word: u16) -> Option<FsaState> {
        match status_word & FSA_MASK {
            0x00 | 0x20 => Some(FsaState::NotReadyToSwitchOn),
            0x40 | 0x60 => Some(FsaState::SwitchOnDisabled),
            0x21 => Some(FsaState::ReadyToSwitchOn),
            0x23 => Some(FsaState::SwitchedOn),
            0x27 => Some(FsaState::OperationEnabled),
            0x07 => Some(FsaState::QuickStopActive),
            0x0F | 0x2F => Some(FsaState::FaultReactionActive),
            0x08 | 0x28 => Some(FsaState::Fault),
            _ => None,
        }
    }
}

/// Next controlword for a drive reporting `status_word`.
///
/// `power` is the requested power state. The command only ever moves the
/// drive one state along; the drive performs the transition itself.
pub fn next_control_word(status_word: u16, control_word: u16, power: bool) -> u16 {
    let mut cw = ControlWord::from_bits_retain(control_word);

    match (FsaState::decode(status_word), power) {
        (Some(FsaState::SwitchOnDisabled), _) => {
            // shutdown
            cw.remove(ControlWord::SWITCH_ON | ControlWord::FAULT_RESET);
            cw.insert(ControlWord::ENABLE_VOLTAGE | ControlWord::QUICK_STOP);
        }
        (Some(FsaState::ReadyToSwitchOn | FsaState::OperationEnabled), false) => {
            // switch on, or disable operation
            cw.remove(ControlWord::FAULT_RESET | ControlWord::ENABLE_OPERATION);
            cw.insert(ControlWord::SWITCH_ON | ControlWord::ENABLE_VOLTAGE | ControlWord::QUICK_STOP);
        }
        (
            Some(FsaState::ReadyToSwitchOn | FsaState::SwitchedOn | FsaState::OperationEnabled),
            true,
        ) => {
            // switch on + enable operation
            cw.remove(ControlWord::FAULT_RESET);
            cw.insert(
                ControlWord::SWITCH_ON
                    | ControlWord::ENABLE_VOLTAGE
                    | ControlWord::QUICK_STOP
                    | ControlWord::ENABLE_OPERATION,
            );
        }
        (Some(FsaState::Fault), _) => {
            cw.remove(
                ControlWord::SWITCH_ON
                    | ControlWord::ENABLE_VOLTAGE
                    | ControlWord::QUICK_STOP
                    | ControlWord::ENABLE_OPERATION,
            );
            cw.insert(ControlWord::FAULT_RESET);
        }
        _ => {}
    }

    cw.bits()
}

/// Modes of operation (0x6060).
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ModeOfOperation {
    ProfilePosition = 1,
    Velocity = 2,
    ProfileVelocity = 3,
    ProfileTorque = 4,
    Homing = 6,
    InterpolatedPosition = 7,
    CyclicSynchronousPosition = 8,
    CyclicSynchronousVelocity = 9,
    CyclicSynchronousTorque = 10,
}

impl ModeOfOperation {
    pub fn from_code(code: i8) -> Option<Self> {
        num::FromPrimitive::from_i8(code)
    }

    pub fn code(self) -> i8 {
        self as i8
    }
}

impl Default for ModeOfOperation {
    fn default() -> Self {
        ModeOfOperation::CyclicSynchronousPosition
    }
}
