pub mod connection;
pub mod event;
pub mod roulette;
pub mod stats;

pub use connection::*;
pub use event::*;
pub use roulette::*;
pub use stats::*;
