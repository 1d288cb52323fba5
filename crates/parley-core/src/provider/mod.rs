//! Provider resolution for chat requests.
//!
//! [`ProviderResolver`] turns a user's stored chat task configuration into a
//! validated [`ProviderConfig`](parley_types::provider::ProviderConfig),
//! backed by a TTL [`ProviderCache`].

pub mod cache;
pub mod resolver;

pub use cache::ProviderCache;
pub use resolver::{ProviderResolver, ResolveError};
