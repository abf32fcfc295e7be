pub mod access_log;
pub mod analytics;
pub mod audit_file_writer;
pub mod audit_log;
pub mod pii_scrubber;

#[cfg(feature = "prometheus")]
pub mod metrics;

#[cfg(feature = "prometheus")]
pub mod prometheus_exporter;

#[cfg(feature = "victoria")]
pub mod logger;

pub use access_log::AccessLogEntry;
pub use analytics::{AnalyticsRollup, AnalyticsSubscriber};
pub use audit_file_writer::{AuditFileConfig, AuditFileWriter};
pub use audit_log::{AuditLogEntry, AuditOutcome};

#[cfg(feature = "prometheus")]
pub use metrics::{MetricsCollector, VictoriaMetricsConfig};

#[cfg(feature = "prometheus")]
pub use prometheus_exporter::render_metrics;

#[cfg(feature = "victoria")]
pub use logger::{VictoriaLogsConfig, VictoriaLogsExporter};
