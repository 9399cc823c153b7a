use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::{AppError, AppResult};
use crate::models::{LineItem, Pricing, ServiceDefinition, VehicleType};
use crate::services::catalog::effective_price;

const MONEY_DECIMAL_PLACES: u32 = 2;

/// Round half-up (away from zero) to cents and pin the scale so `10` prints as `10.00`.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_DECIMAL_PLACES);
    rounded
}

#[derive(Debug, Clone)]
pub struct PricingContext {
    pub date: NaiveDate,
    pub vehicle_type: Option<VehicleType>,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub currency: String,
}

/// Line items plus totals for one booking.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub line_items: Vec<LineItem>,
    pub pricing: Pricing,
    pub estimated_duration_minutes: u32,
}

/// Price `(service, quantity)` pairs. Pure: identical inputs always give identical quotes.
///
/// Every amount is rounded when it is computed, so stored values never drift on re-read.
/// The total is clamped at zero when the discount exceeds subtotal plus tax.
pub fn price(lines: &[(&ServiceDefinition, u32)], ctx: &PricingContext) -> AppResult<Quote> {
    if lines.is_empty() {
        return Err(AppError::InvalidRequest(
            "a booking needs at least one service".to_string(),
        ));
    }
    if ctx.discount_amount.is_sign_negative() {
        return Err(AppError::InvalidRequest(format!(
            "discount cannot be negative: {}",
            ctx.discount_amount
        )));
    }
    if ctx.tax_rate.is_sign_negative() {
        return Err(AppError::InvalidRequest(format!(
            "tax rate cannot be negative: {}",
            ctx.tax_rate
        )));
    }

    let mut line_items = Vec::with_capacity(lines.len());
    let mut duration: u32 = 0;

    for (service, quantity) in lines {
        if *quantity == 0 {
            return Err(AppError::InvalidRequest(format!(
                "quantity for service {} must be at least 1",
                service.id
            )));
        }
        let unit_price = effective_price(service, ctx.date);
        let line_total = round_money(unit_price * Decimal::from(*quantity));
        let line_minutes = service
            .duration_minutes
            .checked_mul(*quantity)
            .ok_or_else(|| AppError::InvalidRequest(format!("quantity too large for {}", service.id)))?;
        duration = duration
            .checked_add(line_minutes)
            .ok_or_else(|| AppError::InvalidRequest("booking is too long".to_string()))?;

        line_items.push(LineItem {
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            quantity: *quantity,
            unit_price,
            line_total,
            duration_minutes: line_minutes,
        });
    }

    let subtotal = round_money(line_items.iter().map(|l| l.line_total).sum());
    let tax_amount = round_money(subtotal * ctx.tax_rate);
    let discount_amount = round_money(ctx.discount_amount);
    let total_amount = round_money((subtotal + tax_amount - discount_amount).max(Decimal::ZERO));

    Ok(Quote {
        line_items,
        pricing: Pricing {
            subtotal,
            tax_rate: ctx.tax_rate,
            tax_amount,
            discount_amount,
            total_amount,
            currency: ctx.currency.clone(),
        },
        estimated_duration_minutes: duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn service(id: &str, cents: i64, minutes: u32) -> ServiceDefinition {
        ServiceDefinition {
            id: id.to_string(),
            name: id.to_uppercase(),
            category: "maintenance".to_string(),
            base_price: Decimal::new(cents, 2),
            currency: "SAR".to_string(),
            duration_minutes: minutes,
            vehicle_types: vec![],
            seasonal_pricing: vec![],
            promotions: vec![],
            active: true,
        }
    }

    fn ctx(discount: Decimal) -> PricingContext {
        PricingContext {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            vehicle_type: None,
            discount_amount: discount,
            tax_rate: Decimal::new(15, 2),
            currency: "SAR".to_string(),
        }
    }

    #[test]
    fn test_two_services_with_vat() {
        let a = service("a", 15000, 60);
        let b = service("b", 8000, 30);
        let quote = price(&[(&a, 2), (&b, 1)], &ctx(Decimal::ZERO)).unwrap();

        assert_eq!(quote.pricing.subtotal, Decimal::new(38000, 2));
        assert_eq!(quote.pricing.tax_amount, Decimal::new(5700, 2));
        assert_eq!(quote.pricing.total_amount, Decimal::new(43700, 2));
        assert_eq!(quote.pricing.total_amount.to_string(), "437.00");
        assert_eq!(quote.line_items[0].line_total, Decimal::new(30000, 2));
        assert_eq!(quote.estimated_duration_minutes, 150);
    }

    #[test]
    fn test_discount_larger_than_total_clamps_to_zero() {
        let a = service("a", 1000, 30);
        let quote = price(&[(&a, 1)], &ctx(Decimal::new(500, 0))).unwrap();
        assert_eq!(quote.pricing.total_amount, Decimal::ZERO);
        assert_eq!(quote.pricing.discount_amount, Decimal::new(50000, 2));
    }

    #[test]
    fn test_tax_rounds_half_up() {
        // 0.10 * 0.15 = 0.015 -> 0.02
        let a = service("a", 10, 15);
        let quote = price(&[(&a, 1)], &ctx(Decimal::ZERO)).unwrap();
        assert_eq!(quote.pricing.tax_amount, Decimal::new(2, 2));
    }

    #[test]
    fn test_rejects_zero_quantity() {
        let a = service("a", 1000, 30);
        let err = price(&[(&a, 0)], &ctx(Decimal::ZERO)).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn test_rejects_empty_and_negative_discount() {
        assert!(price(&[], &ctx(Decimal::ZERO)).is_err());
        let a = service("a", 1000, 30);
        assert!(price(&[(&a, 1)], &ctx(Decimal::new(-1, 0))).is_err());
    }

    proptest! {
        #[test]
        fn prop_total_is_consistent_and_non_negative(
            prices in prop::collection::vec(0i64..500_000, 1..6),
            quantities in prop::collection::vec(1u32..5, 6),
            discount_cents in 0i64..2_000_000,
        ) {
            let services: Vec<ServiceDefinition> = prices
                .iter()
                .enumerate()
                .map(|(i, cents)| service(&format!("s{i}"), *cents, 15))
                .collect();
            let lines: Vec<(&ServiceDefinition, u32)> = services
                .iter()
                .zip(quantities.iter().copied())
                .collect();
            let context = ctx(Decimal::new(discount_cents, 2));

            let first = price(&lines, &context).unwrap();
            let second = price(&lines, &context).unwrap();
            prop_assert_eq!(&first, &second);

            let p = &first.pricing;
            prop_assert!(!p.total_amount.is_sign_negative());
            let expected = (p.subtotal + p.tax_amount - p.discount_amount).max(Decimal::ZERO);
            prop_assert_eq!(p.total_amount, expected);
            prop_assert_eq!(p.total_amount.scale(), 2);
        }
    }
}
