use std::{path::Path, sync::atomic::Ordering, time::Duration};

use cia402_controller::{Cia402Controller, FsaState};
use cia402_runner::{CycleTask, PowerSequencer};
use ethercat_io::{Config, SimulatedTransport, VariableTable};

fn load_config() -> Config {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/two_axes.yaml");
    let mut config = Config::from_yaml(path).unwrap();
    config.ethercat.cycle_time_us = 100;
    config.application.power_on_delay_cycles = 5;
    config
}

#[test]
fn example_config_powers_both_axes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = load_config();

    let transport =
        SimulatedTransport::new(config.simulation.descriptors()).with_drive_emulation();
    let mut vars = VariableTable::new();
    let mut controller = Cia402Controller::open(transport, &mut vars).unwrap();
    assert_eq!(controller.slave_ids(), vec![0, 1, 2]);
    assert_eq!(controller.drives().len(), 2);

    let entries = config.declare(&mut vars).unwrap();
    controller.map(&entries, &vars).unwrap();
    controller.activate(config.cycle_period()).unwrap();
    assert_eq!(
        controller.transport().cycle_period(),
        Some(Duration::from_micros(100))
    );

    let mut app = PowerSequencer::from_config(&config, &entries);
    let mut task = CycleTask::new(config.cycle_period());
    let stop = task.stop_handle();

    task.run(|cycle| {
        controller.cycle(&mut vars, |vars| app.step(vars))?;
        if app.powered(&vars) || cycle >= 100 {
            stop.store(false, Ordering::SeqCst);
        }
        Ok::<(), cia402_controller::Error>(())
    })
    .unwrap();

    assert!(app.powered(&vars));
    assert!(task.stats().cycles < 100);
    for slave in [0, 1] {
        assert_eq!(
            controller.drive_state(slave, &vars),
            Some(FsaState::OperationEnabled)
        );
    }
}
