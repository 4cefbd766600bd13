pub mod correlator;
pub mod download;
pub mod handlers;
pub mod maintenance;
pub mod reassemble;
pub mod sender;
pub mod session;
pub mod transport;
