pub mod api;
pub mod cli;
pub mod client;
pub mod coordination;
pub mod error;
pub mod relay;
pub mod server;
pub mod settings;
pub mod transport;
