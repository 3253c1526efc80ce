//! Domain-control challenges: DNS TXT record or `/.well-known/oap-challenge`
//! HTTP file, proving a claimant controls the domain before Layer 1 trust is
//! granted. Grounded on `dashflow-webscrape`'s SSRF-guarded fetch pattern
//! (every outbound call here goes through [`URLGuard`] too) combined with
//! `hickory-resolver` for the DNS TXT lookup.

use crate::error::{OapError, Result};
use crate::url_guard::URLGuard;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use rand::RngCore;
use reqwest::Client;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    DnsTxt,
    HttpWellKnown,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DomainChallenge {
    pub domain: String,
    pub kind: ChallengeKind,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DomainChallenge {
    pub fn new(domain: &str, kind: ChallengeKind, ttl: ChronoDuration, now: DateTime<Utc>) -> Self {
        let mut raw = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = format!("oap-verify-{}", hex::encode(raw));
        Self {
            domain: domain.to_string(),
            kind,
            token,
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    /// Expected DNS TXT record name for [`ChallengeKind::DnsTxt`].
    pub fn dns_record_name(&self) -> String {
        format!("_oap-challenge.{}", self.domain)
    }

    /// Expected well-known URL for [`ChallengeKind::HttpWellKnown`].
    pub fn well_known_url(&self) -> String {
        format!("https://{}/.well-known/oap-challenge", self.domain)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub struct ChallengeVerifier {
    client: Client,
    url_guard: URLGuard,
    resolver: TokioAsyncResolver,
}

impl ChallengeVerifier {
    pub fn new(client: Client, url_guard: URLGuard) -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self {
            client,
            url_guard,
            resolver,
        }
    }

    pub async fn verify(&self, challenge: &DomainChallenge, now: DateTime<Utc>) -> Result<bool> {
        if challenge.is_expired(now) {
            return Err(OapError::Forbidden("challenge has expired".into()));
        }
        match challenge.kind {
            ChallengeKind::DnsTxt => self.verify_dns(challenge).await,
            ChallengeKind::HttpWellKnown => self.verify_http(challenge).await,
        }
    }

    async fn verify_dns(&self, challenge: &DomainChallenge) -> Result<bool> {
        let name = challenge.dns_record_name();
        let lookup = self
            .resolver
            .txt_lookup(&name)
            .await
            .map_err(|e| OapError::Upstream(format!("TXT lookup failed for {name}: {e}")))?;
        Ok(lookup.iter().any(|record| {
            record
                .txt_data()
                .iter()
                .any(|bytes| bytes == challenge.token.as_bytes())
        }))
    }

    async fn verify_http(&self, challenge: &DomainChallenge) -> Result<bool> {
        let url = url::Url::parse(&challenge.well_known_url())
            .map_err(|e| OapError::InvalidRequest(format!("invalid challenge url: {e}")))?;
        self.url_guard.validate(&url).await?;
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .text()
            .await?;
        Ok(body.trim() == challenge.token)
    }
}
