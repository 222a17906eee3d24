use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sanitize_display;

/// Cap on a single reverse lookup; a slow resolver must not stall a hop
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// DNS cache entry
struct CacheEntry {
    hostname: Option<String>,
    cached_at: Instant,
}

/// Best-effort reverse DNS with caching.
///
/// Every failure (NXDOMAIN, timeout, resolver error) yields `None`.
pub struct DnsLookup {
    resolver: TokioAsyncResolver,
    cache: RwLock<HashMap<IpAddr, CacheEntry>>,
    cache_ttl: Duration,
}

impl DnsLookup {
    /// Use the system resolver configuration, falling back to public defaults
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!(error = %e, "system resolver config unavailable, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });

        Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(3600), // 1 hour
        }
    }

    /// Lookup reverse DNS for an IP, using cache
    pub async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        // Check cache first
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&ip)
                && entry.cached_at.elapsed() < self.cache_ttl
            {
                return entry.hostname.clone();
            }
        }

        let hostname = match tokio::time::timeout(LOOKUP_TIMEOUT, self.resolver.reverse_lookup(ip)).await {
            Ok(Ok(lookup)) => lookup.iter().next().map(|name| {
                let s = name.to_string();
                // Remove trailing dot
                sanitize_display(s.trim_end_matches('.'))
            }),
            Ok(Err(e)) => {
                debug!(%ip, error = %e, "reverse lookup failed");
                None
            }
            Err(_) => {
                debug!(%ip, "reverse lookup timed out");
                None
            }
        };

        self.cache.write().insert(
            ip,
            CacheEntry {
                hostname: hostname.clone(),
                cached_at: Instant::now(),
            },
        );

        hostname
    }

    /// `reverse_lookup` that gives up with `None` as soon as `cancel` fires
    pub async fn reverse_lookup_until(&self, ip: IpAddr, cancel: &CancellationToken) -> Option<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            hostname = self.reverse_lookup(ip) => hostname,
        }
    }
}

impl Default for DnsLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_cancelled_lookup_returns_at_once() {
        let dns = DnsLookup::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        // TEST-NET-1, never answered quickly
        let name = dns
            .reverse_lookup_until(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), &cancel)
            .await;
        assert!(name.is_none());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_cached_name_served_without_resolver() {
        let dns = DnsLookup::new();
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));
        dns.cache.write().insert(
            ip,
            CacheEntry {
                hostname: Some("edge.example".to_string()),
                cached_at: Instant::now(),
            },
        );
        let name = dns.reverse_lookup_until(ip, &CancellationToken::new()).await;
        assert_eq!(name.as_deref(), Some("edge.example"));
    }
}
