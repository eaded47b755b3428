//! # Seed Data Generator
//!
//! Populates the database with a development catalog.
//!
//! ## Usage
//! ```bash
//! # Generate 200 products (default)
//! cargo run -p lapak-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p lapak-db --bin seed -- --count 1000
//!
//! # Specify database path
//! cargo run -p lapak-db --bin seed -- --db ./data/lapak.db
//! ```
//!
//! ## Generated Data
//! Products rotate through every content × inventory combination:
//! - Game and software keys (stock based, 5 - 24 keys each)
//! - Premium accounts (stock based)
//! - Course access links (unlimited, one shared link)
//! - Source code bundles (stock based and unlimited, one file each)
//!
//! Plus the `SAVE10` promo (10% off the order) and a demo wallet with
//! Rp 500.000.
//!
//! Secrets are stored with the development passthrough cipher. Never point
//! this at a production database.

use std::env;

use chrono::Utc;
use lapak_core::{
    ContentKind, InventoryKind, LedgerKind, LedgerReference, Money, PlaintextCipher, PromoCode,
    PromoKind, PromoScope, SaleDiscount,
};
use lapak_db::repository::product::NewProduct;
use lapak_db::{Database, DbConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Catalog templates: (category, name, content, inventory)
const TEMPLATES: &[(&str, &str, ContentKind, InventoryKind)] = &[
    ("games", "Steam Wallet Code", ContentKind::Keys, InventoryKind::StockBased),
    ("software", "Office Suite License", ContentKind::Keys, InventoryKind::StockBased),
    ("streaming", "Premium Music Account", ContentKind::DigitalAccount, InventoryKind::StockBased),
    ("courses", "Rust Bootcamp Access", ContentKind::AccessLink, InventoryKind::Unlimited),
    ("source", "POS Starter Kit Source", ContentKind::SourceCode, InventoryKind::StockBased),
    ("source", "Landing Page Template", ContentKind::SourceCode, InventoryKind::Unlimited),
    ("courses", "Private Discord Invite", ContentKind::AccessLink, InventoryKind::StockBased),
];

/// Base prices in rupiah.
const PRICES: &[i64] = &[15_000, 25_000, 50_000, 75_000, 100_000, 150_000, 250_000];

const DEMO_USER: &str = "demo-user";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lapak=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./lapak_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Lapak Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./lapak_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, count = count, "Seeding database");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing = existing, "Database already has products, skipping seed");
        return Ok(());
    }

    let cipher = PlaintextCipher;
    let start = std::time::Instant::now();
    let mut generated = 0;

    for seed in 0..count {
        let (category, name, content, inventory) = TEMPLATES[seed % TEMPLATES.len()];
        let price = Money::from_idr(PRICES[(seed * 7) % PRICES.len()]);

        let mut new = NewProduct::new(format!("{} #{}", name, seed + 1), price, content, inventory)
            .category(category);
        if seed % 5 == 0 {
            // Dateless: runs until someone removes it.
            new = new.sale(SaleDiscount::Percent(20), None, None);
        }

        let product = match db.products().insert(&new).await {
            Ok(product) => product,
            Err(e) => {
                warn!(name = %new.name, error = %e, "Failed to insert product");
                continue;
            }
        };

        match (content, inventory) {
            (ContentKind::SourceCode, _) => {
                let file_ref = format!("files/{}/{}.zip", category, product.id);
                db.products()
                    .set_shared_content(&product.id, Some(&file_ref), &cipher)
                    .await?;
            }
            (_, InventoryKind::Unlimited) => {
                let link = format!("https://learn.lapak.test/join/{}", product.id);
                db.products()
                    .set_shared_content(&product.id, Some(&link), &cipher)
                    .await?;
            }
            (_, InventoryKind::StockBased) => {
                let items: Vec<String> = (0..(5 + seed % 20))
                    .map(|_| generate_secret(content))
                    .collect();
                db.products().restock(&product.id, &items, &cipher).await?;
            }
        }

        generated += 1;
        if generated % 50 == 0 {
            info!(generated = generated, "Generating products");
        }
    }

    db.promos()
        .insert(&PromoCode {
            id: Uuid::new_v4().to_string(),
            code: "SAVE10".to_string(),
            kind: PromoKind::Percent,
            value: 10,
            starts_at: None,
            ends_at: None,
            min_subtotal: None,
            max_discount: None,
            usage_limit: None,
            per_user_limit: None,
            is_active: true,
            scope: PromoScope::Order,
        })
        .await?;

    db.ledger()
        .post(
            DEMO_USER,
            Money::from_idr(500_000),
            LedgerKind::Topup,
            &LedgerReference::Manual {
                note: format!("seed {}", Utc::now().format("%Y-%m-%d")),
            },
        )
        .await?;

    let elapsed = start.elapsed();
    info!(
        generated = generated,
        elapsed_ms = elapsed.as_millis() as u64,
        demo_user = DEMO_USER,
        "Seed complete"
    );

    Ok(())
}

/// Generates a plausible secret for a stock-based item.
fn generate_secret(content: ContentKind) -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    match content {
        ContentKind::Keys => format!("{}-{}-{}-{}", &raw[0..5], &raw[5..10], &raw[10..15], &raw[15..20]),
        ContentKind::DigitalAccount => format!("user_{}@mail.test:{}", &raw[0..6].to_lowercase(), &raw[6..18]),
        ContentKind::AccessLink => format!("https://discord.gg/{}", &raw[0..10].to_lowercase()),
        ContentKind::SourceCode => format!("files/{}.zip", raw),
    }
}
