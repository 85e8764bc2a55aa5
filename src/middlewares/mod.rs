pub mod auth;
pub mod cors;

pub use auth::{AuthMiddleware, current_user, require_role};
pub use cors::create_cors;
