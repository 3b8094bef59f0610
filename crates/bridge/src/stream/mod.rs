//! The remote stream side of an upload: a reader waiting for the browser to post a file.

mod handshake;
mod remote;

pub use remote::{ReadProgress, RemoteFileStream, StreamPhase};
