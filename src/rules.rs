// src/rules.rs
//! Consistency rules for stock and catalog quantities.
//!
//! Everything here is pure: handlers read the current state, call into
//! this module, and persist only when the rule accepts the change.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

use crate::access::Role;
use crate::models::{BookStatus, MovementDirection, OrderStatus};

lazy_static! {
    static ref ISBN10_REGEX: Regex = Regex::new(r"^\d{9}[\dX]$").unwrap();
    static ref ISBN13_REGEX: Regex = Regex::new(r"^\d{13}$").unwrap();
}

// ==================== BOOK STATUS ====================

/// Status of a book as seen by the shop floor.
///
/// Copies on the shelf win over copies at the printer, so a title with any
/// ready copy is `Ready` even while a reprint is running.
pub fn derive_status(ready: i64, printing: i64) -> BookStatus {
    if ready > 0 {
        BookStatus::Ready
    } else if printing > 0 {
        BookStatus::Printing
    } else {
        BookStatus::Unavailable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityError {
    Negative { field: &'static str },
    ReadyExceedsTotal { ready: i64, total: i64 },
    AllocatedExceedsTotal { ready: i64, printing: i64, total: i64 },
}

impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantityError::Negative { field } => write!(f, "{} cannot be negative", field),
            QuantityError::ReadyExceedsTotal { ready, total } => write!(
                f,
                "Ready quantity ({}) cannot exceed total quantity ({})",
                ready, total
            ),
            QuantityError::AllocatedExceedsTotal { ready, printing, total } => write!(
                f,
                "Ready ({}) plus printing ({}) cannot exceed total quantity ({})",
                ready, printing, total
            ),
        }
    }
}

impl std::error::Error for QuantityError {}

/// Checks the book quantity invariants. The first failing check wins.
pub fn validate_quantities(total: i64, ready: i64, printing: i64) -> Result<(), QuantityError> {
    for (field, value) in [
        ("total_quantity", total),
        ("ready_quantity", ready),
        ("printing_quantity", printing),
    ] {
        if value < 0 {
            return Err(QuantityError::Negative { field });
        }
    }

    if ready > total {
        return Err(QuantityError::ReadyExceedsTotal { ready, total });
    }

    // ready <= total here, so the sum cannot overflow unless printing is huge
    match ready.checked_add(printing) {
        Some(allocated) if allocated <= total => Ok(()),
        _ => Err(QuantityError::AllocatedExceedsTotal { ready, printing, total }),
    }
}

// ==================== INVENTORY MOVEMENTS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockError {
    NonPositiveAmount(i64),
    InsufficientStock { available: i64, requested: i64 },
    Overflow,
}

impl fmt::Display for StockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockError::NonPositiveAmount(amount) => {
                write!(f, "Movement quantity must be greater than zero (got {})", amount)
            }
            StockError::InsufficientStock { available, requested } => write!(
                f,
                "Insufficient stock. Available: {}, Requested: {}",
                available, requested
            ),
            StockError::Overflow => write!(f, "Resulting quantity is too large"),
        }
    }
}

impl std::error::Error for StockError {}

/// Quantity of a material after applying one movement.
pub fn apply_movement(current: i64, direction: MovementDirection, amount: i64) -> Result<i64, StockError> {
    if amount <= 0 {
        return Err(StockError::NonPositiveAmount(amount));
    }

    match direction {
        MovementDirection::In => current.checked_add(amount).ok_or(StockError::Overflow),
        MovementDirection::Out => {
            if amount > current {
                Err(StockError::InsufficientStock { available: current, requested: amount })
            } else {
                Ok(current - amount)
            }
        }
    }
}

pub fn is_low_stock(quantity: i64, min_quantity: i64) -> bool {
    quantity <= min_quantity
}

/// Only admins may delete a material that already has ledger entries.
pub fn can_delete_material(has_movements: bool, role: Role) -> bool {
    !has_movements || role == Role::Admin
}

// ==================== PRINT ORDERS ====================

/// `completed_at` value to store after an order moves to `status`.
pub fn completion_timestamp(
    status: OrderStatus,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match status {
        OrderStatus::Completed => Some(previous.unwrap_or(now)),
        _ => None,
    }
}

// ==================== ISBN ====================

/// Strips hyphens and spaces and returns the canonical ISBN-10/13 form.
pub fn normalize_isbn(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if ISBN10_REGEX.is_match(&cleaned) || ISBN13_REGEX.is_match(&cleaned) {
        Some(cleaned)
    } else {
        None
    }
}
