// src/barcode.rs - System-generated identifiers printed as CODE128 labels
use chrono::Utc;
use rand::{thread_rng, Rng};

pub const MATERIAL_PREFIX: &str = "MAT";
pub const BOOK_PREFIX: &str = "BOOK";
pub const ORDER_PREFIX: &str = "ORD";

/// `<prefix><unix millis><4 random digits>`. Uniqueness is enforced by a
/// UNIQUE index, not here.
pub fn generate(prefix: &str) -> String {
    let suffix: u16 = thread_rng().gen_range(0..10_000);
    format!("{}{}{:04}", prefix, Utc::now().timestamp_millis(), suffix)
}

pub fn material() -> String {
    generate(MATERIAL_PREFIX)
}

pub fn book() -> String {
    generate(BOOK_PREFIX)
}

pub fn order_number() -> String {
    generate(ORDER_PREFIX)
}

/// Barcodes are plain ASCII alphanumerics so they survive CODE128 set B.
pub fn is_valid(barcode: &str) -> bool {
    !barcode.is_empty() && barcode.len() <= 64 && barcode.chars().all(|c| c.is_ascii_alphanumeric())
}
