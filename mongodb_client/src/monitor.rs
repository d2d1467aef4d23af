mod monitor_actor;
mod monitor_handle;

pub(crate) use monitor_actor::*;
pub(crate) use monitor_handle::*;
