pub mod client;
pub mod server;

pub use server::Sidecar;
