//! Upstream dialing and relaying

mod splice;
mod upstream;

pub use splice::splice;
pub use upstream::{DirectUpstream, DEFAULT_CONNECT_TIMEOUT};

pub(crate) use upstream::dial;
