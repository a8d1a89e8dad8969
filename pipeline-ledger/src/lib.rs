pub mod cli;
pub mod load_config;
pub mod local_store;
pub mod transform;

pub use cli::{run, Cli, Commands};
