mod client_builder;
mod client_error;
mod client_handle;
mod client_options;

pub use client_builder::*;
pub use client_error::*;
pub use client_handle::*;
pub use client_options::*;
