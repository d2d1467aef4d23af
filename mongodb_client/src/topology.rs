mod sdam_engine;
mod topology_actor;
mod topology_handle;
mod topology_helpers;

pub(crate) use sdam_engine::*;
pub(crate) use topology_actor::*;
pub(crate) use topology_handle::*;
pub(crate) use topology_helpers::*;
