//! Payment approval.
//!
//! Checkout asks a [`PaymentGateway`] to approve the card before any stock
//! is taken. The gateway is a trait so a real processor can be plugged in;
//! the server ships with [`LocalGateway`], which approves every well-formed
//! card.

use async_trait::async_trait;
use rust_decimal::Decimal;

use marketplace_core::protocol::PaymentDetails;

use crate::error::{AppError, Result};

const CARD_DIGITS: std::ops::RangeInclusive<usize> = 12..=19;

/// Approves or declines a charge.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns `true` if the charge of `amount` is approved.
    async fn approve(&self, payment: &PaymentDetails, amount: Decimal) -> Result<bool>;
}

/// Gateway that approves every validated card.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGateway;

#[async_trait]
impl PaymentGateway for LocalGateway {
    async fn approve(&self, payment: &PaymentDetails, amount: Decimal) -> Result<bool> {
        tracing::debug!(name = %payment.name, %amount, "Payment approved locally");
        Ok(true)
    }
}

/// Check the shape of payment details before they reach a gateway.
///
/// Spaces and dashes in the card number are ignored.
///
/// # Errors
///
/// Returns `InvalidArgument` naming the first bad field.
pub fn validate_payment(payment: &PaymentDetails) -> Result<()> {
    if payment.name.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "cardholder name is required".to_string(),
        ));
    }

    let digits: Vec<char> = payment
        .card_number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    if !CARD_DIGITS.contains(&digits.len()) || !digits.iter().all(char::is_ascii_digit) {
        return Err(AppError::InvalidArgument(
            "card number must be 12 to 19 digits".to_string(),
        ));
    }

    if !is_valid_expiry(payment.expiry.trim()) {
        return Err(AppError::InvalidArgument(
            "expiry must be MM/YY".to_string(),
        ));
    }
    Ok(())
}

fn is_valid_expiry(expiry: &str) -> bool {
    let Some((month, year)) = expiry.split_once('/') else {
        return false;
    };
    let two_digits = |s: &str| s.len() == 2 && s.chars().all(|c| c.is_ascii_digit());
    two_digits(month)
        && two_digits(year)
        && month.parse::<u8>().is_ok_and(|m| (1..=12).contains(&m))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn card(name: &str, number: &str, expiry: &str) -> PaymentDetails {
        PaymentDetails {
            name: name.to_string(),
            card_number: number.to_string(),
            expiry: expiry.to_string(),
        }
    }

    #[test]
    fn test_valid_card() {
        assert!(validate_payment(&card("Ada", "4111 1111 1111 1111", "09/28")).is_ok());
        assert!(validate_payment(&card("Ada", "4111-1111-1111", "12/30")).is_ok());
    }

    #[test]
    fn test_blank_name_rejected() {
        assert!(validate_payment(&card("  ", "4111111111111111", "09/28")).is_err());
    }

    #[test]
    fn test_card_number_rejected() {
        assert!(validate_payment(&card("Ada", "4111", "09/28")).is_err());
        assert!(validate_payment(&card("Ada", "4111a11111111111", "09/28")).is_err());
        assert!(validate_payment(&card("Ada", "41111111111111111111", "09/28")).is_err());
    }

    #[test]
    fn test_expiry_rejected() {
        assert!(validate_payment(&card("Ada", "4111111111111111", "13/28")).is_err());
        assert!(validate_payment(&card("Ada", "4111111111111111", "00/28")).is_err());
        assert!(validate_payment(&card("Ada", "4111111111111111", "0928")).is_err());
        assert!(validate_payment(&card("Ada", "4111111111111111", "9/2028")).is_err());
    }

    #[tokio::test]
    async fn test_local_gateway_approves() {
        let approved = LocalGateway
            .approve(&card("Ada", "4111111111111111", "09/28"), Decimal::ONE)
            .await
            .unwrap();
        assert!(approved);
    }
}
