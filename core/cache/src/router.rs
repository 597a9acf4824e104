//! Strategy selection for outbound requests.

use repsync_common::{HttpRequest, Method};

use crate::config::CacheConfig;

/// Caching behaviour applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve the cached API response immediately and refresh it in the
    /// background; await the network only on a cache miss.
    StaleWhileRevalidate,
    /// Always go to the network; never read or write a cache.
    NetworkOnly,
    /// Serve the cached asset if present, otherwise fetch and store it.
    CacheFirst,
}

/// Pick the strategy for a request.
///
/// | Request                     | Strategy             |
/// |-----------------------------|----------------------|
/// | GET under the API prefix    | stale-while-revalidate |
/// | non-GET under the API prefix| network only         |
/// | other GET                   | cache first          |
/// | other non-GET               | network only         |
pub fn classify(request: &HttpRequest, config: &CacheConfig) -> Strategy {
    let is_get = request.method == Method::Get;

    if config.is_api_path(request.url.path()) {
        if is_get {
            Strategy::StaleWhileRevalidate
        } else {
            Strategy::NetworkOnly
        }
    } else if is_get {
        Strategy::CacheFirst
    } else {
        Strategy::NetworkOnly
    }
}
