use std::time::Duration;

use ethercat_io::{MappingEntry, MappingRegistry, SlaveDescriptor, Transport, VariableTable};

use crate::{
    drive::{self, DriveRecord},
    Error, FsaState, ModeOfOperation,
};

/// One EtherCAT session: the transport, what was discovered on the bus and
/// the current bindings.
///
/// Setup is `open`, `map`, `activate`. Then every period either `cycle`, or
/// `receive` and `send` around the application code.
#[derive(Debug)]
pub struct Cia402Controller<T: Transport> {
    transport: T,
    slaves: Vec<SlaveDescriptor>,
    drives: Vec<DriveRecord>,
    registry: MappingRegistry,
}

impl<T: Transport> Cia402Controller<T> {
    /// Scans the bus and reserves the drive slots in `vars`.
    pub fn open(mut transport: T, vars: &mut VariableTable) -> Result<Self, Error> {
        let mut slaves = transport.discover_slaves()?;
        slaves.sort_by_key(|s| s.position);

        log::info!("Found {} EtherCAT slaves", slaves.len());
        for slave in &slaves {
            log::debug!(
                " - slave {}: \"{}\" vendor {:#x} product {:#x}",
                slave.position,
                slave.name,
                slave.vendor_id,
                slave.product_code
            );
        }

        let drives = drive::discover(&slaves, vars);

        Ok(Self {
            transport,
            slaves,
            drives,
            registry: MappingRegistry::new(),
        })
    }

    /// Binds `entries` to the bus, replacing the previous mapping.
    ///
    /// A mapping rejected by the drive layer changes nothing. A mapping
    /// rejected by the registry or the transport leaves nothing bound.
    pub fn map(&mut self, entries: &[MappingEntry], vars: &VariableTable) -> Result<(), Error> {
        let rewritten = drive::rewrite(entries, &mut self.drives)?;

        if let Err(e) =
            self.registry
                .register(&rewritten, vars, self.slaves.as_slice(), &mut self.transport)
        {
            for drive in self.drives.iter_mut() {
                drive.unbind();
            }
            return Err(e.into());
        }

        Ok(())
    }

    pub fn activate(&mut self, cycle_period: Duration) -> Result<(), Error> {
        self.transport.activate(cycle_period)?;
        let len = self.transport.process_image()?.len();
        self.registry.check_image(len)?;

        log::info!(
            "EtherCAT session active: {} bound objects in {} bytes",
            self.registry.len(),
            len
        );
        Ok(())
    }

    /// Inbound half of a cycle: feedback variables are up to date afterwards.
    pub fn receive(&mut self, vars: &mut VariableTable) -> Result<(), Error> {
        self.transport.receive()?;
        let image = self.transport.process_image()?;
        self.registry.apply_inbound(image, vars);
        drive::retrieve(&self.drives, vars);
        Ok(())
    }

    /// Outbound half of a cycle: commands computed from the current variables.
    pub fn send(&mut self, vars: &mut VariableTable) -> Result<(), Error> {
        drive::publish(&self.drives, vars);
        let image = self.transport.process_image()?;
        self.registry.apply_outbound(image, vars);
        self.transport.send()?;
        Ok(())
    }

    pub fn cycle<F>(&mut self, vars: &mut VariableTable, mut app: F) -> Result<(), Error>
    where
        F: FnMut(&mut VariableTable),
    {
        self.receive(vars)?;
        app(vars);
        self.send(vars)
    }

    pub fn drives(&self) -> &[DriveRecord] {
        &self.drives
    }

    pub fn drive(&self, slave: u16) -> Option<&DriveRecord> {
        self.drives.iter().find(|d| d.slave() == slave)
    }

    pub fn drive_state(&self, slave: u16, vars: &VariableTable) -> Option<FsaState> {
        self.drive(slave).and_then(|d| d.state(vars))
    }

    pub fn set_mode_of_operation(
        &self,
        slave: u16,
        mode: ModeOfOperation,
        vars: &mut VariableTable,
    ) -> Result<(), Error> {
        let drive = self.drive(slave).ok_or_else(|| Error::NotACiA402Slave {
            slave,
            name: "mode_of_operation".to_string(),
        })?;
        log::info!("Slave {}: mode of operation {:?}", slave, mode);
        drive.set_mode_of_operation(vars, mode);
        Ok(())
    }

    pub fn slave_ids(&self) -> Vec<u16> {
        self.slaves.iter().map(|s| s.position).collect()
    }

    pub fn slaves(&self) -> &[SlaveDescriptor] {
        &self.slaves
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Ends the session and hands the transport back.
    pub fn close(self) -> T {
        log::info!("Closing EtherCAT session");
        self.transport
    }
}
