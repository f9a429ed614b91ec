mod error;
mod profiles_toml;

pub use error::*;
pub use profiles_toml::*;
