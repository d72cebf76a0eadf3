pub mod cache;
pub mod client;
pub mod distributor;
pub mod gate;
pub mod normalizer;
pub mod supervisor;

pub use cache::{ApplyOutcome, EntityCache};
pub use client::{ApplyReport, StreamClient};
pub use distributor::{Callback, EventDistributor, Subscription};
pub use gate::{AccessCredential, AccessGate, GateDecision};
pub use normalizer::{PayloadShape, RawBatch};
pub use supervisor::ConnectionSupervisor;
