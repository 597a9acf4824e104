//! Network-intercept cache layer for repsync.
//!
//! Every outbound request passes through [`InterceptLayer`], which picks a
//! caching strategy from the request's shape:
//! - API reads are served stale-while-revalidate
//! - API writes always go to the network and are never cached
//! - Static assets are served cache-first, with the root document as the
//!   offline fallback for navigations
//!
//! The layer knows nothing about the mutation queue. Static assets and API
//! reads live in separate, versioned cache namespaces.

pub mod config;
pub mod fetch;
pub mod layer;
pub mod local;
pub mod memory;
pub mod router;
pub mod substrate;

pub use config::CacheConfig;
pub use fetch::{Fetch, ReqwestFetch};
pub use layer::InterceptLayer;
pub use local::LocalCacheStorage;
pub use memory::MemoryCacheStorage;
pub use router::{classify, Strategy};
pub use substrate::CacheStorage;
