pub mod common;
pub mod configs;
pub mod server;
pub mod sources;
pub mod stream;
pub mod transport;
