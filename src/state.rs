use crate::config::AppConfig;
use crate::services::payments::PaymentService;
use crate::services::scheduling::SchedulingService;

pub struct AppState {
    pub config: AppConfig,
    pub scheduler: SchedulingService,
    pub payments: PaymentService,
}
