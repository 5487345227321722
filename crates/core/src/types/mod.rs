//! Core types for Certdeck.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod price;
pub mod status;
pub mod token;

pub use id::*;
pub use price::Price;
pub use status::{OrderStatus, PaymentProvider, PaymentStatus};
pub use token::{DownloadToken, TokenError};
