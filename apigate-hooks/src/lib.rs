pub mod dispatcher;
pub mod event_bus;
pub mod phase;
pub mod registry;

pub use dispatcher::{Hook, HookDispatcher};
pub use event_bus::{DeadLetter, Event, EventBus, EventBusConfig, EventSubscriber};
pub use phase::{hook_key, HookContext, HookPhase};
pub use registry::{FunctionRegistry, NamedFunction};
