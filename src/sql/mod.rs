//! PostgreSQL backend: identifiers from resource declarations only, values as parameters.

mod backend;
mod builder;
pub mod params;

pub use backend::SqlBackend;
pub use builder::*;
pub use params::*;
