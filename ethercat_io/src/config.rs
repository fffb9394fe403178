use std::{fs, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    transport::{SimulatedSlave, SlaveDescriptor},
    AddressError, Direction, MappingEntry, NetworkAddress, Value, VariableTable,
};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub ethercat: EthercatConfig,
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EthercatConfig {
    pub master_id: u32,
    pub cycle_time_us: u32,
}

impl Default for EthercatConfig {
    fn default() -> Self {
        Self {
            master_id: 0,
            cycle_time_us: 1000,
        }
    }
}

/// One application variable and the bus object it is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub name: String,
    pub address: String,
    pub direction: Direction,
    pub kind: VariableKind,
    #[serde(default)]
    pub initial: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F64,
}

impl VariableKind {
    pub fn value(self, initial: f64) -> Value {
        match self {
            VariableKind::Bool => Value::Bool(initial != 0.0),
            VariableKind::U8 => Value::U8(initial as u8),
            VariableKind::I8 => Value::I8(initial as i8),
            VariableKind::U16 => Value::U16(initial as u16),
            VariableKind::I16 => Value::I16(initial as i16),
            VariableKind::U32 => Value::U32(initial as u32),
            VariableKind::I32 => Value::I32(initial as i32),
            VariableKind::F64 => Value::F64(initial),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Cycles to wait before asserting the power variables.
    pub power_on_delay_cycles: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            power_on_delay_cycles: 100,
        }
    }
}

/// Devices of the bus used when running without hardware.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub slaves: Vec<SimulatedSlave>,
}

impl SimulationConfig {
    pub fn descriptors(&self) -> Vec<SlaveDescriptor> {
        self.slaves
            .iter()
            .enumerate()
            .map(|(position, slave)| slave.descriptor(position as u16))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("mapping \"{name}\": {source}")]
    Address { name: String, source: AddressError },
    #[error("cycle_time_us must be greater than 0")]
    CycleTime,
}

impl Config {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        if config.ethercat.cycle_time_us == 0 {
            return Err(ConfigError::CycleTime);
        }
        for mapping in &config.mappings {
            mapping.network_address()?;
        }
        Ok(config)
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_micros(self.ethercat.cycle_time_us as u64)
    }

    /// Declares one variable per mapping and returns the mapping list, in config order.
    pub fn declare(&self, vars: &mut VariableTable) -> Result<Vec<MappingEntry>, ConfigError> {
        self.mappings
            .iter()
            .map(|mapping| {
                let address = mapping.network_address()?;
                let variable = vars.declare(mapping.kind.value(mapping.initial));
                Ok(MappingEntry::new(variable, address, mapping.direction))
            })
            .collect()
    }
}

impl MappingConfig {
    pub fn network_address(&self) -> Result<NetworkAddress, ConfigError> {
        self.address
            .parse()
            .map_err(|source| ConfigError::Address {
                name: self.name.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::ObjectAddress;

    const YAML: &str = r#"
ethercat:
  master_id: 0
  cycle_time_us: 2000
mappings:
  - name: axis0_power
    address: "0:power"
    direction: output
    kind: bool
  - name: axis0_target
    address: "0:target"
    direction: output
    kind: i32
  - name: axis0_factor
    address: "0:factor"
    direction: output
    kind: f64
    initial: 100.0
  - name: di0
    address: "1:0x6000:0x1"
    direction: input
    kind: bool
application:
  power_on_delay_cycles: 10
simulation:
  slaves:
    - kind: cia402_drive
    - kind: digital_io
      inputs: 8
      outputs: 4
"#;

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = Config::from_yaml(file.path()).unwrap();
        assert_eq!(config.ethercat.cycle_time_us, 2000);
        assert_eq!(config.cycle_period(), Duration::from_millis(2));
        assert_eq!(config.mappings.len(), 4);
        assert_eq!(config.application.power_on_delay_cycles, 10);
        assert_eq!(
            config.simulation.slaves,
            vec![
                SimulatedSlave::Cia402Drive,
                SimulatedSlave::DigitalIo {
                    inputs: 8,
                    outputs: 4
                }
            ]
        );
        assert_eq!(config.simulation.descriptors()[1].position, 1);
    }

    #[test]
    fn declares_variables_in_order() {
        let config = Config::from_yaml_str(YAML).unwrap();
        let mut vars = VariableTable::new();
        let entries = config.declare(&mut vars).unwrap();

        assert_eq!(vars.len(), 4);
        assert_eq!(entries[0].address, NetworkAddress::named(0, "power"));
        assert_eq!(entries[0].direction, Direction::Output);
        assert_eq!(vars.get(entries[2].variable), Some(Value::F64(100.0)));
        assert_eq!(
            entries[3].address,
            NetworkAddress::Object(ObjectAddress::new(1, 0x6000, 1))
        );
        assert_eq!(entries[3].direction, Direction::Input);
    }

    #[test]
    fn defaults_apply_to_optional_sections() {
        let config = Config::from_yaml_str("ethercat:\n  master_id: 1\n  cycle_time_us: 500\n")
            .unwrap();
        assert!(config.mappings.is_empty());
        assert!(config.simulation.slaves.is_empty());
        assert_eq!(config.application.power_on_delay_cycles, 100);
    }

    #[test]
    fn rejects_bad_addresses_and_cycle_times() {
        let yaml = "ethercat:\n  master_id: 0\n  cycle_time_us: 1000\nmappings:\n  - name: broken\n    address: \"0:0x6040\"\n    direction: output\n    kind: u16\n";
        match Config::from_yaml_str(yaml) {
            Err(ConfigError::Address { name, .. }) => assert_eq!(name, "broken"),
            other => panic!("unexpected result: {:?}", other),
        }

        let yaml = "ethercat:\n  master_id: 0\n  cycle_time_us: 0\n";
        assert!(matches!(
            Config::from_yaml_str(yaml),
            Err(ConfigError::CycleTime)
        ));

        let yaml = "ethercat:\n  master_id: 0\n  cycle_time_us: 1000\nmappings:\n  - name: x\n    address: \"0:power\"\n    direction: output\n    kind: u64\n";
        assert!(matches!(
            Config::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Config::from_yaml("/nonexistent/cia402.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
