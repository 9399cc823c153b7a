pub mod calendar;
pub mod catalog;
pub mod lifecycle;
pub mod payments;
pub mod pricing;
pub mod scheduling;
pub mod store;
