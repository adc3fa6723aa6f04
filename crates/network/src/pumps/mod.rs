//! Per-connection transport pumps.

mod read;
mod write;

pub(crate) use read::read_pump;
pub(crate) use write::write_pump;
