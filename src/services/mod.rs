pub mod connection_pool;
pub mod connection_registry;
pub mod database; // Relational drivers and the federated subprocess bridge
pub mod dispatcher;
pub mod error_classifier;
pub mod metadata_cache;
pub mod result_normalizer;
pub mod schema_introspector;

pub use connection_pool::*;
pub use connection_registry::ConnectionRegistry;
pub use dispatcher::BackendDispatcher;
pub use error_classifier::ErrorClassifier;
pub use metadata_cache::MetadataCache;
pub use result_normalizer::{RawQueryOutput, ResultNormalizer};
pub use schema_introspector::SchemaIntrospector;
