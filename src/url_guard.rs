//! `URLGuard`: SSRF defense applied before every outbound dial and before
//! following any redirect hop.
//!
//! Grounded on `dashflow-webscrape/src/lib.rs`'s `SsrfConfig`/`is_private_ip`
//! classification (scheme whitelist, private/loopback/link-local/reserved/
//! multicast/metadata blocks); DNS resolution is async via `hickory-resolver`
//! instead of the teacher's blocking `std::net::ToSocketAddrs`, since every
//! caller here already runs inside a tokio task.

use crate::error::{OapError, Result};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::Url;

#[derive(Clone, Debug)]
pub struct SsrfConfig {
    pub allowed_schemes: Vec<String>,
    pub allowed_ports: Vec<u16>,
    /// Domains that bypass the private-IP block, e.g. for local dev/test.
    pub domain_allowlist: Vec<String>,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["https".into(), "http".into()],
            allowed_ports: vec![80, 443],
            domain_allowlist: Vec::new(),
        }
    }
}

/// Validates outbound URLs pre-dial (scheme/port/host shape) and post-resolve
/// (resolved IPs are not private/loopback/link-local/metadata/multicast),
/// per SPEC_FULL.md §4.6's invocation safety requirements.
pub struct URLGuard {
    config: SsrfConfig,
    resolver: TokioAsyncResolver,
}

impl URLGuard {
    pub fn new(config: SsrfConfig) -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { config, resolver }
    }

    /// Scheme/port/host syntax checks that don't require a network round trip.
    pub fn validate_url_pre_resolve(&self, url: &Url) -> Result<()> {
        if !self.config.allowed_schemes.contains(&url.scheme().to_string()) {
            return Err(OapError::Forbidden(format!(
                "scheme {} is not allowed",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| OapError::InvalidRequest("URL has no host".into()))?;
        if host.trim().is_empty() {
            return Err(OapError::InvalidRequest("URL host is empty".into()));
        }

        if let Some(port) = url.port() {
            if !self.config.allowed_ports.contains(&port) {
                return Err(OapError::Forbidden(format!("port {port} is not allowed")));
            }
        }

        Ok(())
    }

    /// Resolve `host` and reject if any resolved address is private/reserved,
    /// unless `host` is in the configured allowlist.
    pub async fn check_resolved_host(&self, host: &str) -> Result<Vec<IpAddr>> {
        if self.config.domain_allowlist.iter().any(|d| d == host) {
            return self.resolve(host).await;
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            if is_private_ip(ip) {
                return Err(OapError::Forbidden(format!("{host} resolves to a private address")));
            }
            return Ok(vec![ip]);
        }

        let ips = self.resolve(host).await?;
        for ip in &ips {
            if is_private_ip(*ip) {
                return Err(OapError::Forbidden(format!(
                    "{host} resolves to private address {ip}"
                )));
            }
        }
        Ok(ips)
    }

    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let response = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| OapError::Upstream(format!("DNS resolution failed for {host}: {e}")))?;
        let ips: Vec<IpAddr> = response.iter().collect();
        if ips.is_empty() {
            return Err(OapError::Upstream(format!("DNS resolution for {host} returned no records")));
        }
        Ok(ips)
    }

    /// Full check for a dial or redirect hop: pre-resolve syntax checks then
    /// resolved-IP classification.
    pub async fn validate(&self, url: &Url) -> Result<Vec<IpAddr>> {
        self.validate_url_pre_resolve(url)?;
        let host = url.host_str().expect("checked in validate_url_pre_resolve");
        self.check_resolved_host(host).await
    }
}

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    if ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_multicast() || ip.is_broadcast() {
        return true;
    }
    let octets = ip.octets();
    // 100.64.0.0/10 carrier-grade NAT (RFC 6598).
    if octets[0] == 100 && (octets[1] & 0xc0) == 64 {
        return true;
    }
    // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24 documentation (RFC 5737).
    if (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
    {
        return true;
    }
    // Cloud metadata endpoint.
    if ip == Ipv4Addr::new(169, 254, 169, 254) {
        return true;
    }
    if ip.is_unspecified() {
        return true;
    }
    false
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return true;
    }
    let segments = ip.segments();
    // fe80::/10 link-local.
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    // fc00::/7 unique local.
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // 2001:db8::/32 documentation.
    if segments[0] == 0x2001 && segments[1] == 0x0db8 {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_v4_are_blocked() {
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(is_private_ip("10.0.0.5".parse().unwrap()));
        assert!(is_private_ip("192.168.1.1".parse().unwrap()));
        assert!(is_private_ip("172.16.0.1".parse().unwrap()));
    }

    #[test]
    fn cloud_metadata_address_is_blocked() {
        assert!(is_private_ip("169.254.169.254".parse().unwrap()));
    }

    #[test]
    fn carrier_grade_nat_is_blocked() {
        assert!(is_private_ip("100.64.0.1".parse().unwrap()));
        assert!(!is_private_ip("100.63.255.255".parse().unwrap()));
    }

    #[test]
    fn public_v4_address_is_allowed() {
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("1.1.1.1".parse().unwrap()));
    }

    #[test]
    fn ipv6_loopback_and_unique_local_are_blocked() {
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(is_private_ip("fc00::1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
    }

    #[test]
    fn ipv6_documentation_prefix_is_blocked() {
        assert!(is_private_ip("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn public_ipv6_address_is_allowed() {
        assert!(!is_private_ip("2606:4700:4700::1111".parse().unwrap()));
    }

    #[test]
    fn pre_resolve_rejects_disallowed_scheme() {
        let guard = URLGuard::new(SsrfConfig::default());
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert!(guard.validate_url_pre_resolve(&url).is_err());
    }

    #[test]
    fn pre_resolve_rejects_disallowed_port() {
        let guard = URLGuard::new(SsrfConfig::default());
        let url = Url::parse("https://example.com:8443/").unwrap();
        assert!(guard.validate_url_pre_resolve(&url).is_err());
    }

    #[test]
    fn pre_resolve_accepts_plain_https() {
        let guard = URLGuard::new(SsrfConfig::default());
        let url = Url::parse("https://example.com/capability").unwrap();
        assert!(guard.validate_url_pre_resolve(&url).is_ok());
    }

    #[tokio::test]
    async fn check_resolved_host_blocks_literal_private_ip() {
        let guard = URLGuard::new(SsrfConfig::default());
        let err = guard.check_resolved_host("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, OapError::Forbidden(_)));
    }

    #[tokio::test]
    async fn check_resolved_host_allows_allowlisted_domain_even_if_private() {
        let mut config = SsrfConfig::default();
        config.domain_allowlist.push("127.0.0.1".into());
        let guard = URLGuard::new(config);
        assert!(guard.check_resolved_host("127.0.0.1").await.is_ok());
    }
}
