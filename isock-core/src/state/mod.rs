pub mod connection;
mod stats;

pub use connection::SessionPhase;
pub use stats::{SessionStats, StatsSnapshot};
