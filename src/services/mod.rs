// Services module - Business logic

pub mod access_control;
pub mod audit;
pub mod booking_rules;
pub mod notifier;
pub mod password;
pub mod qr_generator;
pub mod sessions;
pub mod signature;
pub mod tokens;
