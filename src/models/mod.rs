pub mod connection;
pub mod metadata;
pub mod query;
pub mod sensitive;

pub use connection::*;
pub use metadata::*;
pub use query::*;
pub use sensitive::*;
