pub mod orchestrator;
pub mod recorder;
pub mod serve;
pub mod sse;
pub mod transform_apply;
pub mod upstream_client;
pub mod websocket;

pub use orchestrator::{InboundRequest, Orchestrator, OrchestratorConfig, ProxyResponse, ProxyStream, WebsocketAuthorization};
pub use recorder::{RecorderConfig, UsageRecorder};
pub use serve::serve;
pub use sse::{extract_sse_last_data, parse_sse_events, read_dotted_numeric, SseAccumulator, SseEvent};
pub use transform_apply::{apply as apply_transform, Exchange};
pub use upstream_client::{UpstreamClients, UpstreamResponse};
