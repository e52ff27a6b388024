// Output module for volley

pub mod errors;
pub mod mux;
pub mod terminal;

pub use errors::{connect_suggestion, ConnectKind, VolleyError};
pub use mux::OutputMultiplexer;
pub use terminal::Terminal;
