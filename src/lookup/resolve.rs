use std::net::IpAddr;
use tracing::debug;

use crate::error::ProbeError;
use crate::state::Target;

/// Resolve a hostname or IP literal to an IPv4 target
pub async fn resolve_target(host: &str) -> Result<Target, ProbeError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ProbeError::resolution(host, "empty hostname"));
    }

    // Try parsing as IP address first
    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(_) => Ok(Target::new(host.to_string(), ip)),
            IpAddr::V6(_) => Err(ProbeError::resolution(host, "IPv6 targets are not supported")),
        };
    }

    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| ProbeError::resolution(host, e.to_string()))?;

    let resolved = addrs
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| ProbeError::resolution(host, "no IPv4 address found"))?;

    debug!(host, %resolved, "resolved target");
    Ok(Target::new(host.to_string(), resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_ipv4_literal() {
        let target = resolve_target("127.0.0.1").await.unwrap();
        assert_eq!(target.resolved, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(target.original, "127.0.0.1");
        assert!(target.hostname.is_none());
    }

    #[tokio::test]
    async fn test_ipv6_literal_rejected() {
        let err = resolve_target("::1").await.unwrap_err();
        assert!(matches!(err, ProbeError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_empty_host_rejected() {
        let err = resolve_target("  ").await.unwrap_err();
        assert!(matches!(err, ProbeError::Resolution { .. }));
    }
}
