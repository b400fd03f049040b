use thiserror::Error;

use coursemart_core::DomainError;

use crate::money::Amount;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PricingError {
    #[error("invalid price: {0} (base price must be >= 0)")]
    InvalidPrice(Amount),

    #[error("invalid exchange rate: {0} (must be finite and > 0)")]
    InvalidRate(f64),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid country: {0}")]
    InvalidCountry(String),
}

impl From<PricingError> for DomainError {
    fn from(value: PricingError) -> Self {
        DomainError::validation(value.to_string())
    }
}
