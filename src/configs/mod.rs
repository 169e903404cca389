pub mod base;
pub mod server;
pub mod sources;
pub mod stream;

pub use base::*;
pub use server::*;
pub use sources::*;
pub use stream::*;
