use std::{env, error::Error, sync::atomic::Ordering};

use cia402_controller::Cia402Controller;
use cia402_runner::{CycleTask, PowerSequencer};
use ethercat_io::{Config, SimulatedTransport, Transport, VariableTable};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<_> = env::args().collect();
    let (filename, simulate) = match args.len() {
        2 => (&args[1], false),
        3 if args[2] == "--simulate" => (&args[1], true),
        _ => {
            println!("usage: {} CONFIG-FILE [--simulate]", env!("CARGO_PKG_NAME"));
            return Ok(());
        }
    };

    let config = Config::from_yaml(filename)?;
    log::info!("Loaded {} mappings from {}", config.mappings.len(), filename);

    if simulate {
        let transport =
            SimulatedTransport::new(config.simulation.descriptors()).with_drive_emulation();
        run(transport, &config)
    } else {
        run_on_master(&config)
    }
}

#[cfg(feature = "igh")]
fn run_on_master(config: &Config) -> Result<(), Box<dyn Error>> {
    let transport = ethercat_io::transport::IghTransport::open(config.ethercat.master_id)?;
    run(transport, config)
}

#[cfg(not(feature = "igh"))]
fn run_on_master(_config: &Config) -> Result<(), Box<dyn Error>> {
    log::error!("Built without the \"igh\" feature, only --simulate is available");
    Err("no EtherCAT master available".into())
}

fn run<T: Transport>(transport: T, config: &Config) -> Result<(), Box<dyn Error>> {
    let mut vars = VariableTable::new();
    let mut controller = Cia402Controller::open(transport, &mut vars)?;

    let entries = config.declare(&mut vars)?;
    controller.map(&entries, &vars)?;
    controller.activate(config.cycle_period())?;

    let mut app = PowerSequencer::from_config(config, &entries);

    let mut task = CycleTask::new(config.cycle_period());
    let running = task.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    task.run(|_| controller.cycle(&mut vars, |vars| app.step(vars)))?;

    controller.close();
    Ok(())
}
