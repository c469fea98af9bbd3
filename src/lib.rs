pub mod config;
pub mod error;
pub mod extract;
pub mod observability;
pub mod session;
pub mod store;
pub mod stream;
pub mod transcript;
pub mod transport;

pub(crate) mod json_scan;
mod util;
