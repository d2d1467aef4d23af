mod change_stream_event;
mod change_stream_handle;
mod change_stream_options;

pub use change_stream_event::*;
pub use change_stream_handle::*;
pub use change_stream_options::*;
