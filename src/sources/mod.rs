pub mod niconico;

pub use niconico::NicoClient;
