pub mod backoff;
pub mod snapshot;
pub mod stream;

pub use backoff::Backoff;
pub use snapshot::{HttpSnapshotSource, SnapshotFetcher, SnapshotSource};
pub use stream::{FrameStream, StreamConnector, StreamTransport, WsConnector};
