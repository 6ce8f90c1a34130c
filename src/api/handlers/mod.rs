pub mod connection;
pub mod metadata;
pub mod query;

pub use connection::AppState;
