//! # Signed Download Links
//!
//! Time-boxed, HMAC-signed links to source-code archives, plus a shared
//! per-link attempt limit.
//!
//! ## Link Format
//! ```text
//! {base_url}/{file_ref}?buyer={buyer}&order={order}&expires={unix}&nonce={hex}&sig={hex}
//!
//! sig = hex(HMAC-SHA256(secret, "file_ref|buyer|order|expires|nonce"))
//! ```
//! File ref segments and ids are percent-encoded, and the signed payload is
//! built from the encoded forms, so `|` inside a value cannot shift fields.
//! Every mint draws a fresh nonce: links minted for the same file, buyer and
//! second are still distinct, and each has its own attempt counter.
//! Verification recomputes the signature and checks the expiry;
//! [`DownloadGuard`] additionally counts attempts per signature in the
//! shared `download_counters` table.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DownloadSettings;
use crate::error::{CheckoutError, CheckoutResult};
use lapak_core::{DownloadLink, DownloadLinkIssuer, LinkError};
use lapak_db::Database;

type HmacSha256 = Hmac<Sha256>;

/// Everything but RFC 3986 unreserved characters gets escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Encodes each `/`-separated segment, keeping the separators.
fn encode_path(file_ref: &str) -> String {
    file_ref.split('/').map(encode).collect::<Vec<_>>().join("/")
}

fn decode(value: &str) -> CheckoutResult<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|_| CheckoutError::LinkRejected("malformed link".into()))
}

/// Fields recovered from a verified link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedLink {
    pub file_ref: String,
    pub buyer_id: String,
    pub order_id: String,
    pub expires_at: DateTime<Utc>,
    pub nonce: String,
    pub signature: String,
}

/// Mints and verifies signed download links.
#[derive(Clone)]
pub struct SignedLinkIssuer {
    base_url: String,
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for SignedLinkIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedLinkIssuer")
            .field("base_url", &self.base_url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SignedLinkIssuer {
    pub fn new(base_url: impl Into<String>, secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        SignedLinkIssuer {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self::new(
            &settings.base_url,
            settings.signing_secret.as_bytes(),
            Duration::from_secs(settings.link_ttl_secs),
        )
    }

    fn mac(&self, file_ref: &str, buyer_id: &str, order_id: &str, expires: i64, nonce: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(
            format!(
                "{}|{}|{}|{}|{}",
                encode_path(file_ref),
                encode(buyer_id),
                encode(order_id),
                expires,
                encode(nonce)
            )
            .as_bytes(),
        );
        Some(mac)
    }

    /// Mints a link expiring `ttl` after `now`.
    pub fn mint_at(
        &self,
        file_ref: &str,
        buyer_id: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DownloadLink, LinkError> {
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| LinkError::Mint(e.to_string()))?;
        let expires_at = now + ttl;
        let expires = expires_at.timestamp();
        let nonce = Uuid::new_v4().simple().to_string();
        let sig = self
            .mac(file_ref, buyer_id, order_id, expires, &nonce)
            .ok_or_else(|| LinkError::Mint("invalid signing key".into()))?
            .finalize()
            .into_bytes();

        Ok(DownloadLink {
            url: format!(
                "{}/{}?buyer={}&order={}&expires={}&nonce={}&sig={}",
                self.base_url,
                encode_path(file_ref),
                encode(buyer_id),
                encode(order_id),
                expires,
                nonce,
                hex::encode(sig)
            ),
            expires_at: Utc
                .timestamp_opt(expires, 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    /// Checks a link's signature and expiry.
    pub fn verify(&self, url: &str, now: DateTime<Utc>) -> CheckoutResult<VerifiedLink> {
        let rest = url
            .strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| CheckoutError::LinkRejected("unknown link host".into()))?;
        let (file_ref, query) = rest
            .split_once('?')
            .ok_or_else(|| CheckoutError::LinkRejected("missing parameters".into()))?;

        let mut buyer = None;
        let mut order = None;
        let mut expires = None;
        let mut nonce = None;
        let mut sig = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("buyer", v)) => buyer = Some(decode(v)?),
                Some(("order", v)) => order = Some(decode(v)?),
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("nonce", v)) => nonce = Some(decode(v)?),
                Some(("sig", v)) => sig = Some(v),
                _ => {}
            }
        }

        let (Some(buyer), Some(order), Some(expires), Some(nonce), Some(sig)) =
            (buyer, order, expires, nonce, sig)
        else {
            return Err(CheckoutError::LinkRejected("missing parameters".into()));
        };
        let file_ref = file_ref
            .split('/')
            .map(decode)
            .collect::<CheckoutResult<Vec<_>>>()?
            .join("/");

        let mac = self
            .mac(&file_ref, &buyer, &order, expires, &nonce)
            .ok_or_else(|| CheckoutError::LinkRejected("invalid signing key".into()))?;
        let provided =
            hex::decode(sig).map_err(|_| CheckoutError::LinkRejected("bad signature".into()))?;
        // Constant-time comparison.
        mac.verify_slice(&provided)
            .map_err(|_| CheckoutError::LinkRejected("bad signature".into()))?;

        if now.timestamp() >= expires {
            return Err(CheckoutError::LinkRejected("link expired".into()));
        }

        Ok(VerifiedLink {
            file_ref,
            buyer_id: buyer,
            order_id: order,
            expires_at: Utc
                .timestamp_opt(expires, 0)
                .single()
                .ok_or_else(|| CheckoutError::LinkRejected("bad expiry".into()))?,
            nonce,
            signature: sig.to_string(),
        })
    }
}

impl DownloadLinkIssuer for SignedLinkIssuer {
    fn mint(&self, file_ref: &str, buyer_id: &str, order_id: &str) -> Result<DownloadLink, LinkError> {
        self.mint_at(file_ref, buyer_id, order_id, Utc::now())
    }
}

// =============================================================================
// Attempt Limiting
// =============================================================================

/// Verifies links and enforces the per-link attempt limit.
#[derive(Debug, Clone)]
pub struct DownloadGuard {
    db: Database,
    issuer: SignedLinkIssuer,
    max_attempts: i64,
    window: Duration,
}

impl DownloadGuard {
    pub fn new(db: Database, issuer: SignedLinkIssuer, max_attempts: i64, window: Duration) -> Self {
        DownloadGuard {
            db,
            issuer,
            max_attempts,
            window,
        }
    }

    pub fn from_settings(db: Database, settings: &DownloadSettings) -> Self {
        Self::new(
            db,
            SignedLinkIssuer::from_settings(settings),
            settings.max_attempts,
            Duration::from_secs(settings.attempt_window_secs),
        )
    }

    /// Authorizes one download attempt.
    ///
    /// ## Errors
    /// - `LinkRejected` for forged, malformed, or expired links
    /// - `TooManyAttempts` once the link's window is exhausted
    pub async fn authorize(&self, url: &str, now: DateTime<Utc>) -> CheckoutResult<VerifiedLink> {
        let link = self.issuer.verify(url, now)?;

        let key = format!("dl:{}", link.signature);
        let count = self.db.downloads().hit(&key, self.window, now).await?;
        if count > self.max_attempts {
            warn!(order_id = %link.order_id, buyer_id = %link.buyer_id, count = count, "Download attempt limit reached");
            return Err(CheckoutError::TooManyAttempts);
        }

        debug!(order_id = %link.order_id, attempt = count, "Download authorized");
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapak_db::DbConfig;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn issuer() -> SignedLinkIssuer {
        SignedLinkIssuer::new("https://dl.lapak.test/d/", SECRET, Duration::from_secs(600))
    }

    #[test]
    fn test_mint_and_verify() {
        let now = Utc::now();
        let link = issuer().mint_at("files/app.zip", "u-1", "o-1", now).unwrap();
        assert!(link.url.starts_with("https://dl.lapak.test/d/files/app.zip?buyer=u-1&order=o-1"));

        let verified = issuer().verify(&link.url, now).unwrap();
        assert_eq!(verified.file_ref, "files/app.zip");
        assert_eq!(verified.buyer_id, "u-1");
        assert_eq!(verified.order_id, "o-1");
        assert_eq!(verified.expires_at, link.expires_at);
    }

    #[test]
    fn test_expired_link_is_rejected() {
        let now = Utc::now();
        let link = issuer().mint_at("f.zip", "u-1", "o-1", now).unwrap();
        let later = now + chrono::Duration::seconds(601);
        assert!(matches!(
            issuer().verify(&link.url, later),
            Err(CheckoutError::LinkRejected(_))
        ));
    }

    #[test]
    fn test_tampered_link_is_rejected() {
        let now = Utc::now();
        let link = issuer().mint_at("f.zip", "u-1", "o-1", now).unwrap();

        let other_buyer = link.url.replace("buyer=u-1", "buyer=u-2");
        assert!(issuer().verify(&other_buyer, now).is_err());

        let other_secret = SignedLinkIssuer::new(
            "https://dl.lapak.test/d",
            "another-secret-another-secret-xx",
            Duration::from_secs(600),
        );
        assert!(other_secret.verify(&link.url, now).is_err());
        assert!(issuer().verify("https://evil.test/f.zip?sig=00", now).is_err());
    }

    #[test]
    fn test_links_for_same_file_are_independent() {
        let now = Utc::now();
        let a = issuer().mint_at("f.zip", "u-1", "o-1", now).unwrap();
        let b = issuer().mint_at("f.zip", "u-2", "o-2", now).unwrap();
        assert_ne!(a.url, b.url);
        assert!(issuer().verify(&a.url, now).is_ok());
        assert!(issuer().verify(&b.url, now).is_ok());
    }

    #[test]
    fn test_links_minted_together_are_distinct() {
        let now = Utc::now();
        let a = issuer().mint_at("src/pos.zip", "u-1", "o-1", now).unwrap();
        let b = issuer().mint_at("src/pos.zip", "u-1", "o-1", now).unwrap();
        assert_ne!(a.url, b.url);

        let va = issuer().verify(&a.url, now).unwrap();
        let vb = issuer().verify(&b.url, now).unwrap();
        assert_ne!(va.nonce, vb.nonce);
        assert_ne!(va.signature, vb.signature);
    }

    #[test]
    fn test_reserved_characters_survive_the_url() {
        let now = Utc::now();
        let link = issuer()
            .mint_at("builds/v1 & v2/app?.zip", "a&b=c", "o|1?x", now)
            .unwrap();
        assert!(link.url.starts_with("https://dl.lapak.test/d/builds/v1%20%26%20v2/app%3F.zip?buyer=a%26b%3Dc&"));

        let verified = issuer().verify(&link.url, now).unwrap();
        assert_eq!(verified.file_ref, "builds/v1 & v2/app?.zip");
        assert_eq!(verified.buyer_id, "a&b=c");
        assert_eq!(verified.order_id, "o|1?x");

        let shifted = issuer().mint_at("f.zip", "a", "b|c", now).unwrap();
        let forged = shifted.url.replace("buyer=a&order=b%7Cc", "buyer=a%7Cb&order=c");
        assert!(issuer().verify(&forged, now).is_err());
    }

    #[tokio::test]
    async fn test_attempt_limit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let guard = DownloadGuard::new(db, issuer(), 2, Duration::from_secs(60));
        let now = Utc::now();
        let link = issuer().mint_at("f.zip", "u-1", "o-1", now).unwrap();

        guard.authorize(&link.url, now).await.unwrap();
        guard.authorize(&link.url, now).await.unwrap();
        assert!(matches!(
            guard.authorize(&link.url, now).await,
            Err(CheckoutError::TooManyAttempts)
        ));

        // A sibling link for the same purchase keeps its own count.
        let sibling = issuer().mint_at("f.zip", "u-1", "o-1", now).unwrap();
        guard.authorize(&sibling.url, now).await.unwrap();

        // A fresh window allows downloads again.
        let later = now + chrono::Duration::seconds(61);
        guard.authorize(&link.url, later).await.unwrap();
    }
}
