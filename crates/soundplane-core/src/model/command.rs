//! Commands from control threads to the processing thread
//!
//! Control calls validate on the caller's thread and then queue one of these.
//! The processing thread drains the queue at the top of each cycle, so it
//! stays the only writer of baseline, carriers, zones and touch state.

use std::sync::Arc;

use super::properties::{Property, PropertyValue};
use crate::carriers::CarrierSet;
use crate::driver::SoundplaneDriver;
use crate::zone::ZoneLayout;

pub enum ModelCommand {
    /// Start calibration run `generation` (already accepted by the mode gate)
    BeginCalibrate { generation: u64 },
    EndCalibrate,
    BeginSelectCarriers { generation: u64 },
    NextSelectCarriersStep,
    EndSelectCarriers,
    /// Operator-supplied carriers, written at the next safe point
    SetCarriers(CarrierSet),
    SetDefaultCarriers,
    EnableCarriers(u64),
    /// Fully validated layout to swap in
    LoadZones(Arc<ZoneLayout>),
    SetProperty(Property, PropertyValue),
    Clear,
    AttachDriver(Arc<dyn SoundplaneDriver>),
}

impl std::fmt::Debug for ModelCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelCommand::BeginCalibrate { generation } => {
                write!(f, "BeginCalibrate({})", generation)
            }
            ModelCommand::EndCalibrate => f.write_str("EndCalibrate"),
            ModelCommand::BeginSelectCarriers { generation } => {
                write!(f, "BeginSelectCarriers({})", generation)
            }
            ModelCommand::NextSelectCarriersStep => f.write_str("NextSelectCarriersStep"),
            ModelCommand::EndSelectCarriers => f.write_str("EndSelectCarriers"),
            ModelCommand::SetCarriers(set) => write!(f, "SetCarriers({:?})", set.as_slice()),
            ModelCommand::SetDefaultCarriers => f.write_str("SetDefaultCarriers"),
            ModelCommand::EnableCarriers(mask) => write!(f, "EnableCarriers({:#x})", mask),
            ModelCommand::LoadZones(layout) => write!(f, "LoadZones({} zones)", layout.len()),
            ModelCommand::SetProperty(p, v) => write!(f, "SetProperty({}, {:?})", p, v),
            ModelCommand::Clear => f.write_str("Clear"),
            ModelCommand::AttachDriver(_) => f.write_str("AttachDriver"),
        }
    }
}
