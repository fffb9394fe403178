use cia402_controller::ProfileSignal;
use ethercat_io::{Config, MappingEntry, Value, VarHandle, VariableTable};

#[derive(Debug)]
struct Feedback {
    name: String,
    variable: VarHandle,
    last: bool,
}

/// Application logic of the runner: powers every drive mapped through a
/// `power` name once the bus has settled, and logs the `enabled` edges.
#[derive(Debug)]
pub struct PowerSequencer {
    delay_cycles: u64,
    cycle: u64,
    power: Vec<VarHandle>,
    feedback: Vec<Feedback>,
}

impl PowerSequencer {
    pub fn new(delay_cycles: u64) -> Self {
        Self {
            delay_cycles,
            cycle: 0,
            power: vec![],
            feedback: vec![],
        }
    }

    /// `entries` as declared by [`Config::declare`], in config order.
    pub fn from_config(config: &Config, entries: &[MappingEntry]) -> Self {
        let mut sequencer = Self::new(config.application.power_on_delay_cycles);
        for (mapping, entry) in config.mappings.iter().zip(entries) {
            sequencer.watch(&mapping.name, entry);
        }
        sequencer
    }

    /// Picks up the entry if it is a power command or a power feedback.
    pub fn watch(&mut self, name: &str, entry: &MappingEntry) {
        match entry.address.name().and_then(ProfileSignal::from_name) {
            Some(ProfileSignal::Power) => self.power.push(entry.variable),
            Some(ProfileSignal::Enabled) => self.feedback.push(Feedback {
                name: name.to_string(),
                variable: entry.variable,
                last: false,
            }),
            _ => {}
        }
    }

    pub fn powered(&self, vars: &VariableTable) -> bool {
        !self.feedback.is_empty()
            && self
                .feedback
                .iter()
                .all(|f| vars.bool(f.variable).unwrap_or(false))
    }

    pub fn step(&mut self, vars: &mut VariableTable) {
        for feedback in self.feedback.iter_mut() {
            let enabled = vars.bool(feedback.variable).unwrap_or(false);
            if enabled != feedback.last {
                log::info!(
                    "{} {} at cycle {}",
                    feedback.name,
                    if enabled { "enabled" } else { "disabled" },
                    self.cycle
                );
                feedback.last = enabled;
            }
        }

        if self.cycle == self.delay_cycles {
            log::info!("Powering {} drives", self.power.len());
            for &power in &self.power {
                vars.set(power, Value::Bool(true));
            }
        }
        self.cycle += 1;
    }
}
