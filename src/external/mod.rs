pub mod assets;
pub mod notifier;
pub mod payment_gateway;

pub use assets::*;
pub use notifier::*;
pub use payment_gateway::*;
