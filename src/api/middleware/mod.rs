pub mod auth;
pub mod state;

pub use auth::{AuthenticatedUser, RequestMeta};
pub use state::AppState;
