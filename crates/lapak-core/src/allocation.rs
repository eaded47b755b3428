//! # Allocation Strategy
//!
//! Maps (content kind × inventory kind) to exactly one way of delivering a
//! product, and renders the delivered content through the secret and
//! download-link collaborators.
//!
//! ## Strategy Table
//! ```text
//! ┌──────────────────┬──────────────────────────┬──────────────────────────┐
//! │                  │  StockBased              │  Unlimited               │
//! ├──────────────────┼──────────────────────────┼──────────────────────────┤
//! │ Keys             │                          │                          │
//! │ AccessLink       │  ConsumeItems            │  RepeatContent           │
//! │ DigitalAccount   │  (FIFO, decrement stock) │  (count++, same content) │
//! ├──────────────────┼──────────────────────────┼──────────────────────────┤
//! │ SourceCode       │  SharedArtifact          │  UnlimitedArtifact       │
//! │                  │  (file set? mint N links)│  (count++, mint N links) │
//! └──────────────────┴──────────────────────────┴──────────────────────────┘
//! ```
//!
//! Adding a content kind is a compile error in [`AllocationStrategy::for_kinds`]
//! until it is given a strategy.
//!
//! The storage side (conditional decrements, FIFO item removal) lives in
//! lapak-db; this module only holds the I/O-free parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{CoreError, CoreResult};
use crate::types::{ContentKind, DeliveredContent, InventoryKind};

// =============================================================================
// Strategy
// =============================================================================

/// One allocation strategy per (content kind × inventory kind) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// Stock-based item list: remove the oldest `qty` items.
    ConsumeItems,
    /// Stock-based source code: one shared file, `qty` fresh links.
    SharedArtifact,
    /// Unlimited items: bump the counter, hand out the shared item.
    RepeatContent,
    /// Unlimited source code: bump the counter, `qty` fresh links.
    UnlimitedArtifact,
}

impl AllocationStrategy {
    pub fn for_kinds(content: ContentKind, inventory: InventoryKind) -> Self {
        match (inventory, content) {
            (
                InventoryKind::StockBased,
                ContentKind::Keys | ContentKind::AccessLink | ContentKind::DigitalAccount,
            ) => AllocationStrategy::ConsumeItems,
            (InventoryKind::StockBased, ContentKind::SourceCode) => {
                AllocationStrategy::SharedArtifact
            }
            (
                InventoryKind::Unlimited,
                ContentKind::Keys | ContentKind::AccessLink | ContentKind::DigitalAccount,
            ) => AllocationStrategy::RepeatContent,
            (InventoryKind::Unlimited, ContentKind::SourceCode) => {
                AllocationStrategy::UnlimitedArtifact
            }
        }
    }

    /// Whether a purchase decrements the stock counter.
    pub fn consumes_stock(&self) -> bool {
        matches!(self, AllocationStrategy::ConsumeItems)
    }

    /// Whether delivery is a set of freshly minted download links.
    pub fn mints_links(&self) -> bool {
        matches!(
            self,
            AllocationStrategy::SharedArtifact | AllocationStrategy::UnlimitedArtifact
        )
    }
}

// =============================================================================
// Collaborators
// =============================================================================

#[derive(Debug, Clone, Error)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Secret storage. Ciphertexts are opaque strings to everything else.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError>;
}

/// Development cipher: tags values instead of encrypting them.
///
/// Only for seeding and tests. Decrypting anything it did not produce fails,
/// so a real ciphertext is never mistaken for plaintext.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl PlaintextCipher {
    const PREFIX: &'static str = "plain:";
}

impl SecretCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        Ok(format!("{}{}", Self::PREFIX, plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        ciphertext
            .strip_prefix(Self::PREFIX)
            .map(str::to_string)
            .ok_or_else(|| CipherError::Decrypt("value was not produced by PlaintextCipher".into()))
    }
}

/// A minted download link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("could not mint download link: {0}")]
    Mint(String),
}

/// Issues signed, time-boxed links to a stored file.
pub trait DownloadLinkIssuer: Send + Sync {
    fn mint(&self, file_ref: &str, buyer_id: &str, order_id: &str) -> Result<DownloadLink, LinkError>;
}

/// Who a delivery is for, plus the collaborators needed to render it.
#[derive(Clone, Copy)]
pub struct DeliveryContext<'a> {
    pub buyer_id: &'a str,
    pub order_id: &'a str,
    pub cipher: &'a dyn SecretCipher,
    pub links: &'a dyn DownloadLinkIssuer,
}

// =============================================================================
// Rendering
// =============================================================================

/// Decrypts consumed items, preserving their order.
pub fn render_items(
    kind: ContentKind,
    ciphertexts: &[String],
    cipher: &dyn SecretCipher,
) -> CoreResult<Vec<DeliveredContent>> {
    ciphertexts
        .iter()
        .map(|ciphertext| -> CoreResult<DeliveredContent> {
            let plaintext = cipher.decrypt(ciphertext)?;
            Ok(DeliveredContent::from_plaintext(kind, plaintext))
        })
        .collect()
}

/// Renders delivery for the shared-content strategies.
///
/// `shared` is the stored (encrypted) shared content, if configured.
///
/// ## Errors
/// - `InsufficientStock` (available 0) for `SharedArtifact` without a file
/// - Cipher or link failures from the collaborators
pub fn render_shared(
    strategy: AllocationStrategy,
    kind: ContentKind,
    product_id: &str,
    shared: Option<&str>,
    quantity: i64,
    ctx: &DeliveryContext<'_>,
) -> CoreResult<Vec<DeliveredContent>> {
    match (strategy, shared) {
        // Item lists go through render_items; reaching here means the caller
        // lost track of the product's kind.
        (AllocationStrategy::ConsumeItems, _) => Err(CoreError::StockMismatch {
            product_id: product_id.to_string(),
            counter: quantity,
            items: 0,
        }),
        (AllocationStrategy::SharedArtifact, None) => Err(CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            available: 0,
            requested: quantity,
        }),
        (AllocationStrategy::RepeatContent | AllocationStrategy::UnlimitedArtifact, None) => {
            Ok(vec![DeliveredContent::AccessGranted])
        }
        (AllocationStrategy::RepeatContent, Some(ciphertext)) => {
            let plaintext = ctx.cipher.decrypt(ciphertext)?;
            Ok(vec![DeliveredContent::from_plaintext(kind, plaintext)])
        }
        (
            AllocationStrategy::SharedArtifact | AllocationStrategy::UnlimitedArtifact,
            Some(ciphertext),
        ) => {
            let file_ref = ctx.cipher.decrypt(ciphertext)?;
            (0..quantity)
                .map(|_| -> CoreResult<DeliveredContent> {
                    let link = ctx.links.mint(&file_ref, ctx.buyer_id, ctx.order_id)?;
                    Ok(DeliveredContent::Download {
                        url: link.url,
                        expires_at: link.expires_at,
                    })
                })
                .collect()
        }
    }
}

/// Encrypts the secret part of delivered content for storage.
pub fn seal(
    content: &[DeliveredContent],
    cipher: &dyn SecretCipher,
) -> Result<Vec<DeliveredContent>, CipherError> {
    content
        .iter()
        .map(|item| map_secret(item, |secret| cipher.encrypt(secret)))
        .collect()
}

/// Reverses [`seal`].
pub fn unseal(
    content: &[DeliveredContent],
    cipher: &dyn SecretCipher,
) -> Result<Vec<DeliveredContent>, CipherError> {
    content
        .iter()
        .map(|item| map_secret(item, |secret| cipher.decrypt(secret)))
        .collect()
}

fn map_secret<F>(item: &DeliveredContent, f: F) -> Result<DeliveredContent, CipherError>
where
    F: Fn(&str) -> Result<String, CipherError>,
{
    Ok(match item {
        DeliveredContent::Key { value } => DeliveredContent::Key { value: f(value)? },
        DeliveredContent::AccessLink { url } => DeliveredContent::AccessLink { url: f(url)? },
        DeliveredContent::Account { credentials } => DeliveredContent::Account {
            credentials: f(credentials)?,
        },
        DeliveredContent::Download { url, expires_at } => DeliveredContent::Download {
            url: f(url)?,
            expires_at: *expires_at,
        },
        DeliveredContent::AccessGranted => DeliveredContent::AccessGranted,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
