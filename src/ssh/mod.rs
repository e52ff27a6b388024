// SSH transport layer

pub mod session;

pub use session::{BatchSession, HostHandle, SessionPool};
