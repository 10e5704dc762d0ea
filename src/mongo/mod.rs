//! MongoDB backend.

mod backend;
pub mod query;

pub use backend::MongoBackend;
