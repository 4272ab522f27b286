//! # Seed Data Generator
//!
//! Populates a development database with produce from several sellers.
//!
//! ## Usage
//! ```bash
//! # Seed ./harvest_dev.db
//! cargo run -p harvest-db --bin seed
//!
//! # Specify database path and engine config
//! cargo run -p harvest-db --bin seed -- --db ./data/harvest.db --config ./harvest.toml
//!
//! # More detail
//! RUST_LOG=debug cargo run -p harvest-db --bin seed
//! ```

use std::env;
use std::path::PathBuf;

use harvest_core::CatalogProduct;
use harvest_db::{Database, DbConfig};
use harvest_engine::EngineConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// (id, seller, name, price cents, stock, unit, category)
const PRODUCE: &[(&str, &str, &str, i64, i64, &str, &str)] = &[
    ("tomatoes", "green-acres", "Heirloom Tomatoes", 499, 50, "lb", "vegetables"),
    ("lettuce", "green-acres", "Butterhead Lettuce", 299, 30, "head", "vegetables"),
    ("carrots", "sunny-farm", "Rainbow Carrots", 349, 40, "bunch", "vegetables"),
    ("strawberries", "berry-hill", "Strawberries", 699, 25, "pint", "fruit"),
    ("blueberries", "berry-hill", "Wild Blueberries", 899, 20, "pint", "fruit"),
    ("spinach", "sunny-farm", "Baby Spinach", 399, 35, "bag", "vegetables"),
    ("bell-peppers", "green-acres", "Bell Peppers", 449, 30, "lb", "vegetables"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./harvest_dev.db");
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Harvest Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>        Database file path (default: ./harvest_dev.db)");
                println!("  -c, --config <PATH>    Engine config file (default: platform config dir)");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            other => warn!(argument = other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let config = EngineConfig::load(config_path)?;
    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Connected, migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has products, skipping seed");
        println!("Delete {} to regenerate.", db_path);
        return Ok(());
    }

    let market = db.marketplace(&config);
    for (id, seller, name, price, stock, unit, category) in PRODUCE {
        let product = CatalogProduct {
            id: id.to_string(),
            seller_id: seller.to_string(),
            name: name.to_string(),
            unit_price_cents: *price,
            image_ref: Some(format!("images/{}.jpg", id)),
            unit: Some(unit.to_string()),
            category: Some(category.to_string()),
        };
        market.list_product(product, *stock, None).await?;
    }

    println!();
    println!("Seeded {} products:", PRODUCE.len());
    for (id, seller, name, price, _, unit, _) in PRODUCE {
        let available = market.available_quantity(id).await?;
        println!(
            "  {:<14} {:<20} {:>6}/{:<6} {:>4} left  ({})",
            id,
            name,
            harvest_core::Money::from_cents(*price),
            unit,
            available,
            seller
        );
    }

    db.close().await;
    Ok(())
}
