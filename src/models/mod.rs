pub mod availability;
pub mod booking;
pub mod customer;
pub mod service;

pub use availability::{BusinessHours, TimeInterval};
pub use booking::{
    Booking, BookingStatus, LineItem, Payment, PaymentMethod, PaymentStatus, Pricing, Priority,
    StatusChange, VehicleSnapshot,
};
pub use customer::Customer;
pub use service::{Promotion, Season, SeasonalAdjustment, ServiceDefinition, VehicleType};
