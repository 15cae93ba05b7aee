// Models module - Database entity representations

pub mod access_log;
pub mod access_tier;
pub mod audit_log;
pub mod booking;
pub mod device;
pub mod equipment;
pub mod membership;
pub mod notification;
pub mod refresh_token;
pub mod space;
pub mod user;
pub mod user_certification;

pub use access_log::AccessLog;
pub use access_tier::AccessTier;
pub use audit_log::AuditLog;
pub use booking::Booking;
pub use device::Device;
pub use equipment::Equipment;
pub use membership::Membership;
pub use notification::Notification;
pub use refresh_token::RefreshToken;
pub use space::Space;
pub use user::User;
pub use user_certification::UserCertification;
