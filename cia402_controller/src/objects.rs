use ethercat_io::{Direction, ObjectAddress};

pub const CONTROL_WORD_INDEX: u16 = 0x6040;

/// Objects of the CiA402 profile the drive layer puts on the wire.
///
/// All of them live at sub-index 0 of the drive's object dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cia402Object {
    ControlWord,
    StatusWord,
    ModeOfOperation,
    TargetPosition,
}

impl Cia402Object {
    pub fn index(&self) -> u16 {
        match *self {
            Cia402Object::ControlWord => CONTROL_WORD_INDEX,
            Cia402Object::StatusWord => 0x6041,
            Cia402Object::ModeOfOperation => 0x6060,
            Cia402Object::TargetPosition => 0x607A,
        }
    }

    pub fn address(&self, slave: u16) -> ObjectAddress {
        ObjectAddress::new(slave, self.index(), 0)
    }
}

/// Reserved names of the `<slave>:<name>` address form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSignal {
    /// Power command.
    Power,
    /// Power feedback, true while operation is enabled.
    Enabled,
    /// Target position in application units.
    Target,
    /// Raw position counts per application unit.
    Factor,
}

impl ProfileSignal {
    pub fn name(&self) -> &'static str {
        match *self {
            ProfileSignal::Power => "power",
            ProfileSignal::Enabled => "enabled",
            ProfileSignal::Target => "target",
            ProfileSignal::Factor => "factor",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "power" => Some(ProfileSignal::Power),
            "enabled" => Some(ProfileSignal::Enabled),
            "target" => Some(ProfileSignal::Target),
            "factor" => Some(ProfileSignal::Factor),
            _ => None,
        }
    }

    pub fn direction(&self) -> Direction {
        match *self {
            ProfileSignal::Enabled => Direction::Input,
            _ => Direction::Output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_are_case_sensitive() {
        for signal in [
            ProfileSignal::Power,
            ProfileSignal::Enabled,
            ProfileSignal::Target,
            ProfileSignal::Factor,
        ] {
            assert_eq!(ProfileSignal::from_name(signal.name()), Some(signal));
        }
        assert_eq!(ProfileSignal::from_name("Power"), None);
        assert_eq!(ProfileSignal::from_name("velocity"), None);
    }

    #[test]
    fn fixed_object_addresses() {
        assert_eq!(
            Cia402Object::TargetPosition.address(2),
            ObjectAddress::new(2, 0x607A, 0)
        );
        assert_eq!(Cia402Object::ControlWord.index(), 0x6040);
    }
}
