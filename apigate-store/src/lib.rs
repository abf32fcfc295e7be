pub mod cache;
pub mod ports;
pub mod reload;
pub mod sqlite;
pub mod watcher;

pub use cache::ConfigCache;
pub use ports::{KeyStore, PlanStore, RouteStore, SettingStore, UpstreamStore, UsageStore, UsageSummary, UserStore};
pub use reload::ConfigHolder;
pub use sqlite::SqliteStore;
pub use watcher::FileWatcher;
