use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shortest bookable service, in minutes.
pub const MIN_SERVICE_DURATION_MINUTES: u32 = 15;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Sedan,
    Suv,
    Truck,
    Motorcycle,
    Bus,
    Van,
    Coupe,
    Hatchback,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Sedan => "sedan",
            VehicleType::Suv => "suv",
            VehicleType::Truck => "truck",
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Bus => "bus",
            VehicleType::Van => "van",
            VehicleType::Coupe => "coupe",
            VehicleType::Hatchback => "hatchback",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    /// Meteorological season of `date`, northern hemisphere.
    pub fn of(date: NaiveDate) -> Self {
        match date.month() {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Autumn,
            _ => Season::Winter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeasonalAdjustment {
    pub season: Season,
    /// Multiplier applied to the base price, e.g. `1.10` for a 10% surcharge.
    pub factor: Decimal,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Promotion {
    pub title: String,
    pub discount_percent: Decimal,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub active: bool,
}

impl Promotion {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.active && self.valid_from <= date && date <= self.valid_to
    }
}

/// A bookable service as listed in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    pub category: String,
    pub base_price: Decimal,
    pub currency: String,
    pub duration_minutes: u32,
    /// Empty means every vehicle type is accepted.
    #[serde(default)]
    pub vehicle_types: Vec<VehicleType>,
    #[serde(default)]
    pub seasonal_pricing: Vec<SeasonalAdjustment>,
    #[serde(default)]
    pub promotions: Vec<Promotion>,
    pub active: bool,
}

impl ServiceDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_price.is_sign_negative() {
            return Err(anyhow::anyhow!(
                "service {} has a negative base price",
                self.id
            ));
        }
        if self.duration_minutes < MIN_SERVICE_DURATION_MINUTES {
            return Err(anyhow::anyhow!(
                "service {} is shorter than {MIN_SERVICE_DURATION_MINUTES} minutes",
                self.id
            ));
        }
        for promo in &self.promotions {
            if promo.discount_percent.is_sign_negative() || promo.discount_percent > Decimal::ONE_HUNDRED
            {
                return Err(anyhow::anyhow!(
                    "promotion {:?} on service {} is outside 0-100%",
                    promo.title,
                    self.id
                ));
            }
        }
        Ok(())
    }
}
