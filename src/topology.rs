//! Datacenter topology: the setup-file tree and the flattened fleet.
//!
//! A setup file describes datacenters → rooms → racks → machines → CPUs.
//! Machines are flattened in file order into [`MachineDescriptor`]s; a
//! machine's core count is the sum over its CPUs and its per-core speed
//! is the core-weighted mean clock rate (flops per tick per core).

use serde::Deserialize;

use crate::error::SimError;
use crate::types::MachineId;

#[derive(Debug, Deserialize)]
struct SetupFile {
    datacenters: Vec<DatacenterFile>,
}

#[derive(Debug, Deserialize)]
struct DatacenterFile {
    rooms: Vec<RoomFile>,
}

#[derive(Debug, Deserialize)]
struct RoomFile {
    racks: Vec<RackFile>,
}

#[derive(Debug, Deserialize)]
struct RackFile {
    machines: Vec<MachineFile>,
}

#[derive(Debug, Deserialize)]
struct MachineFile {
    cpus: Vec<CpuFile>,
    /// Link speed used by communication-aware policies.
    #[serde(default = "default_ethernet_speed")]
    ethernet_speed: f64,
}

#[derive(Debug, Deserialize)]
struct CpuFile {
    clock_rate_mhz: u64,
    cores: u32,
}

fn default_ethernet_speed() -> f64 {
    1000.0
}

/// Immutable description of one machine in the fleet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineDescriptor {
    pub id: MachineId,
    /// Total cores across all CPUs. Zero cores means the machine halts
    /// at startup.
    pub cores: u32,
    /// Core-weighted mean clock rate, in flops per tick per core.
    pub speed_per_core: f64,
    pub ethernet_speed: f64,
}

/// Parse a JSON setup file into the flattened fleet.
///
/// Structural problems (unparseable JSON, no machines at all, a
/// non-positive link speed, cores with a zero clock rate) raise
/// `MalformedTopology`. A machine with zero cores is legal; it halts
/// at startup.
pub fn fleet_from_json(input: &str) -> Result<Vec<MachineDescriptor>, SimError> {
    let setup: SetupFile =
        serde_json::from_str(input).map_err(|e| SimError::MalformedTopology(e.to_string()))?;

    let mut fleet = Vec::new();
    for dc in &setup.datacenters {
        for room in &dc.rooms {
            for rack in &room.racks {
                for machine in &rack.machines {
                    let id = MachineId(fleet.len() as u32);
                    fleet.push(descriptor(id, machine)?);
                }
            }
        }
    }
    if fleet.is_empty() {
        return Err(SimError::MalformedTopology(
            "setup describes no machines".to_string(),
        ));
    }
    Ok(fleet)
}

fn descriptor(id: MachineId, machine: &MachineFile) -> Result<MachineDescriptor, SimError> {
    let cores: u32 = machine.cpus.iter().map(|c| c.cores).sum();
    let speed_per_core = if cores == 0 {
        0.0
    } else {
        let weighted: f64 = machine
            .cpus
            .iter()
            .map(|c| c.clock_rate_mhz as f64 * c.cores as f64)
            .sum();
        weighted / cores as f64
    };
    if machine.ethernet_speed <= 0.0 {
        return Err(SimError::MalformedTopology(format!(
            "{id}: ethernet speed must be positive"
        )));
    }
    if cores > 0 && speed_per_core <= 0.0 {
        return Err(SimError::MalformedTopology(format!(
            "{id}: cores with a zero clock rate"
        )));
    }
    Ok(MachineDescriptor {
        id,
        cores,
        speed_per_core,
        ethernet_speed: machine.ethernet_speed,
    })
}
