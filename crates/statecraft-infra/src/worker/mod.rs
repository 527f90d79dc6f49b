//! Transports to external task workers.

pub mod unix;

pub use unix::UnixSocketConnector;
