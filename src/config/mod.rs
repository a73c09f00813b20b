pub mod schema;

pub use schema::{resolve_config_path, Config, SessionConfig};
