use std::env;

use chrono::NaiveTime;
use rust_decimal::Decimal;

use crate::models::availability::{parse_time, BusinessHours};

/// Inputs the scheduling core takes from configuration rather than hardcoding.
#[derive(Clone, Debug)]
pub struct SchedulingConfig {
    pub business_hours: BusinessHours,
    pub slot_granularity_minutes: u32,
    pub tax_rate: Decimal,
    pub currency: String,
    pub default_resource: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            business_hours: BusinessHours {
                open: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
                close: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            },
            slot_granularity_minutes: 30,
            tax_rate: Decimal::new(15, 2),
            currency: "SAR".to_string(),
            default_resource: "center".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub scheduling: SchedulingConfig,
    pub payment_gateway_url: String,
    pub payment_api_key: String,
    pub payment_webhook_secret: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = SchedulingConfig::default();

        let open = env::var("BUSINESS_OPEN").ok().and_then(|v| parse_time(&v).ok());
        let close = env::var("BUSINESS_CLOSE").ok().and_then(|v| parse_time(&v).ok());
        let business_hours = match (open, close) {
            (Some(open), Some(close)) if open < close => BusinessHours { open, close },
            (None, None) => defaults.business_hours,
            _ => {
                tracing::warn!("ignoring invalid BUSINESS_OPEN/BUSINESS_CLOSE, using defaults");
                defaults.business_hours
            }
        };

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "servicebay.db".to_string()),
            scheduling: SchedulingConfig {
                business_hours,
                slot_granularity_minutes: env::var("SLOT_GRANULARITY_MINUTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|g| *g > 0)
                    .unwrap_or(defaults.slot_granularity_minutes),
                tax_rate: env::var("TAX_RATE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|r: &Decimal| !r.is_sign_negative())
                    .unwrap_or(defaults.tax_rate),
                currency: env::var("CURRENCY").unwrap_or(defaults.currency),
                default_resource: env::var("DEFAULT_RESOURCE").unwrap_or(defaults.default_resource),
            },
            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            payment_api_key: env::var("PAYMENT_API_KEY").unwrap_or_default(),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
        }
    }
}
