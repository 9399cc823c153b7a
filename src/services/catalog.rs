use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::errors::{AppError, AppResult};
use crate::models::{Season, ServiceDefinition, VehicleType};
use crate::services::pricing::round_money;

#[derive(Debug, Clone, Default)]
pub struct ServiceFilter {
    pub category: Option<String>,
    pub vehicle_type: Option<VehicleType>,
}

/// Read access to the service catalog. The scheduling core never writes to it.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_service_by_id(&self, id: &str) -> AppResult<Option<ServiceDefinition>>;
    async fn list_active_services(&self, filter: &ServiceFilter) -> AppResult<Vec<ServiceDefinition>>;
}

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn get_service(&self, id: &str) -> AppResult<ServiceDefinition> {
        self.store
            .find_service_by_id(id)
            .await?
            .ok_or_else(|| AppError::ServiceNotFound(id.to_string()))
    }

    pub async fn list_active_services(
        &self,
        filter: &ServiceFilter,
    ) -> AppResult<Vec<ServiceDefinition>> {
        let services = self.store.list_active_services(filter).await?;
        Ok(services
            .into_iter()
            .filter(|s| s.active)
            .filter(|s| match &filter.category {
                Some(category) => s.category == *category,
                None => true,
            })
            .filter(|s| match filter.vehicle_type {
                Some(vt) => is_eligible(s, Some(vt)),
                None => true,
            })
            .collect())
    }
}

/// Unit price of `service` for a visit on `date`.
///
/// At most one seasonal factor applies (the first active rule for the season of `date`), then at
/// most one promotion: the largest active discount whose window contains `date`. Promotions never
/// stack. The result is rounded half-up to cents.
pub fn effective_price(service: &ServiceDefinition, date: NaiveDate) -> Decimal {
    let season = Season::of(date);
    let mut price = service.base_price;

    if let Some(rule) = service
        .seasonal_pricing
        .iter()
        .find(|rule| rule.active && rule.season == season)
    {
        price *= rule.factor;
    }

    let best_discount = service
        .promotions
        .iter()
        .filter(|promo| promo.applies_on(date))
        .map(|promo| promo.discount_percent)
        .max();

    if let Some(percent) = best_discount {
        price *= Decimal::ONE - percent / Decimal::ONE_HUNDRED;
    }

    round_money(price.max(Decimal::ZERO))
}

/// An empty vehicle-type list means the service is unrestricted. A booking whose vehicle type is
/// unknown is not rejected.
pub fn is_eligible(service: &ServiceDefinition, vehicle_type: Option<VehicleType>) -> bool {
    match vehicle_type {
        Some(vt) => service.vehicle_types.is_empty() || service.vehicle_types.contains(&vt),
        None => true,
    }
}
