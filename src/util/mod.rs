//! Utility modules

mod panic;
mod socket;
mod tracing_setup;

pub use panic::install_panic_hook;
pub use socket::*;
pub use tracing_setup::init_tracing;
