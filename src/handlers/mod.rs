pub mod admin;
pub mod order;
pub mod organizer;
pub mod ticket;
pub mod webhook;

pub use admin::admin_config;
pub use order::order_config;
pub use organizer::organizer_config;
pub use ticket::ticket_config;
pub use webhook::webhook_config;
