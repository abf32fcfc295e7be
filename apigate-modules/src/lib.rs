pub mod channel_cli;
pub mod channel_http;
pub mod runtime;
pub mod schema;

pub use runtime::{ActionOutcome, ListQuery, ModuleRuntime};
pub use schema::{pluralize, DerivedModule, Field, FieldType, Module};
