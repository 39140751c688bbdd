pub mod config;
pub(crate) mod dropout;
pub mod error;
pub mod resources;

pub use config::Config;
