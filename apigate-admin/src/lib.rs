pub mod middleware;
pub mod server;

pub use server::{AdminServer, AppState};
