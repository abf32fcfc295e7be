pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hasher;
pub mod idgen;
pub mod model;
pub mod route;
pub mod router;
pub mod transform;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{ErrorKind, GatewayError};
pub use model::{ApiKey, Plan, Principal, Setting, UsageEvent, User};
pub use route::Route;
pub use router::Router;
pub use upstream::Upstream;
