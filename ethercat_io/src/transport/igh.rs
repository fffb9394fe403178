use std::{collections::BTreeMap, fmt::Display, time::Duration};

use ethercat::{
    DomainIdx, Idx, Master, MasterAccess, PdoEntryIdx, PdoEntryPos, PdoPos, SlaveAddr, SlaveId,
    SlavePos, SmIdx, SubIdx,
};

use super::{
    Direction, FieldOffset, PdoDescriptor, PdoEntryDescriptor, RegistrationRequest,
    SlaveDescriptor, SyncGroup, Transport, TransportError,
};

fn master_error(e: impl Display) -> TransportError {
    TransportError::Master(e.to_string())
}

// direction bits of the sync manager control register
// 0b01 = written by the master (outputs), 0b00 = read by the master (inputs)
fn sm_direction(control_register: u8) -> Option<Direction> {
    match (control_register >> 2) & 0b11 {
        0b00 => Some(Direction::Input),
        0b01 => Some(Direction::Output),
        _ => None,
    }
}

/// Transport over the IgH EtherCAT master kernel module.
pub struct IghTransport {
    master: Master,
    domain_idx: DomainIdx,
    slaves: Vec<SlaveDescriptor>,
    active: bool,
}

impl IghTransport {
    pub fn open(master_id: u32) -> Result<Self, TransportError> {
        let mut master = Master::open(master_id, MasterAccess::ReadWrite).map_err(master_error)?;
        master.reserve().map_err(master_error)?;
        let domain_idx = master.create_domain().map_err(master_error)?;

        log::info!("EtherCAT master {} reserved", master_id);

        Ok(Self {
            master,
            domain_idx,
            slaves: vec![],
            active: false,
        })
    }

    fn read_slave(&mut self, position: u16) -> Result<SlaveDescriptor, TransportError> {
        let slave_pos = SlavePos::from(position);
        let slave_info = self
            .master
            .get_slave_info(slave_pos)
            .map_err(master_error)?;
        log::debug!("Found device {} : {:?}", slave_info.name, slave_info);

        let mut sync_groups = vec![];
        for sm in 0..slave_info.sync_count {
            let sm_idx = SmIdx::from(sm);
            let sm_info = self.master.get_sync(slave_pos, sm_idx).map_err(master_error)?;
            let direction = match sm_direction(sm_info.control_register) {
                Some(direction) => direction,
                None => continue,
            };
            if sm_info.pdo_count == 0 {
                continue;
            }

            let mut pdos = vec![];
            for p in 0..sm_info.pdo_count {
                let pdo_pos = PdoPos::from(p);
                let pdo = self
                    .master
                    .get_pdo(slave_pos, sm_idx, pdo_pos)
                    .map_err(master_error)?;

                let mut entries = vec![];
                for e in 0..pdo.entry_count {
                    let entry = self
                        .master
                        .get_pdo_entry(slave_pos, sm_idx, pdo_pos, PdoEntryPos::from(e))
                        .map_err(master_error)?;
                    entries.push(PdoEntryDescriptor {
                        index: u16::from(entry.entry_idx.idx),
                        sub_index: u8::from(entry.entry_idx.sub_idx),
                        bit_length: entry.bit_len,
                    });
                }
                pdos.push(PdoDescriptor {
                    index: u16::from(pdo.idx),
                    entries,
                });
            }

            sync_groups.push(SyncGroup {
                index: sm,
                direction,
                pdos,
            });
        }

        Ok(SlaveDescriptor {
            position,
            vendor_id: slave_info.id.vendor_id,
            product_code: slave_info.id.product_code,
            name: slave_info.name,
            sync_groups,
        })
    }
}

impl Transport for IghTransport {
    fn discover_slaves(&mut self) -> Result<Vec<SlaveDescriptor>, TransportError> {
        let info = self.master.get_info().map_err(master_error)?;
        log::info!("EtherCAT master sees {} slaves", info.slave_count);

        let mut slaves = vec![];
        for position in 0..info.slave_count as u16 {
            slaves.push(self.read_slave(position)?);
        }
        self.slaves = slaves.clone();
        Ok(slaves)
    }

    fn register_bindings(
        &mut self,
        requests: &[RegistrationRequest],
    ) -> Result<Vec<FieldOffset>, TransportError> {
        if self.active {
            return Err(TransportError::AlreadyActivated);
        }

        // one slave configuration per slave, the master hands back the same one on each call
        let mut by_slave: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
        for (i, request) in requests.iter().enumerate() {
            by_slave.entry(request.address.slave).or_default().push(i);
        }

        let mut offsets = vec![FieldOffset::default(); requests.len()];
        for (slave, indices) in by_slave {
            let descriptor = self
                .slaves
                .iter()
                .find(|s| s.position == slave)
                .ok_or(TransportError::SlaveNotFound(slave))?;
            let slave_id = SlaveId {
                vendor_id: descriptor.vendor_id,
                product_code: descriptor.product_code,
            };

            let mut config = self
                .master
                .configure_slave(SlaveAddr::ByPos(slave), slave_id)
                .map_err(master_error)?;
            for i in indices {
                let address = requests[i].address;
                let entry_idx = PdoEntryIdx {
                    idx: Idx::from(address.index),
                    sub_idx: SubIdx::from(address.sub_index),
                };
                let offset = config
                    .register_pdo_entry(entry_idx, self.domain_idx)
                    .map_err(|e| TransportError::Registration(format!("{}: {}", address, e)))?;
                offsets[i] = FieldOffset {
                    byte: offset.byte,
                    bit: offset.bit as u8,
                };
            }
        }

        Ok(offsets)
    }

    fn activate(&mut self, cycle_period: Duration) -> Result<(), TransportError> {
        if self.active {
            return Err(TransportError::AlreadyActivated);
        }
        self.master.activate().map_err(master_error)?;
        self.active = true;

        log::info!("EtherCAT master activated, cycle {:?}", cycle_period);
        Ok(())
    }

    fn receive(&mut self) -> Result<(), TransportError> {
        if !self.active {
            return Err(TransportError::NotActivated);
        }
        self.master.receive().map_err(master_error)?;
        self.master
            .domain(self.domain_idx)
            .process()
            .map_err(master_error)?;
        Ok(())
    }

    fn send(&mut self) -> Result<(), TransportError> {
        if !self.active {
            return Err(TransportError::NotActivated);
        }
        self.master
            .domain(self.domain_idx)
            .queue()
            .map_err(master_error)?;
        self.master.send().map_err(master_error)?;
        Ok(())
    }

    fn process_image(&mut self) -> Result<&mut [u8], TransportError> {
        if !self.active {
            return Err(TransportError::NotActivated);
        }
        self.master
            .domain_data(self.domain_idx)
            .map_err(master_error)
    }
}
