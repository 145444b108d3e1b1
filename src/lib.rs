pub mod api;
pub mod backend;
pub mod bridge;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod retry;
pub mod selector;
pub mod settings;
pub mod sink;
pub mod transport;

// Re-export commonly used types for easier testing
pub use crate::backend::{BackendClient, BackendKind, ModelInfo, ModelList, ModelSummary, OllamaClient, VersionInfo, VllmClient};
pub use crate::bridge::{MessagePublisher, TunnelBridge, TunnelSink};
pub use crate::context::{RequestContext, RequestKind};
pub use crate::dispatcher::{DispatchOutcome, RequestDispatcher};
pub use crate::error::{BackendErrorCode, HosterError};
pub use crate::identity::{FileKeyProvider, KeyProvider, PeerIdentity};
pub use crate::protocol::{InferenceEvent, InferenceRequest, RelayEnvelope, TaskFlavor, TunnelMessage};
pub use crate::relay::{InboundOutcome, InboundRouter, RelayForwarder, RelayQueue};
pub use crate::selector::{BackendSelector, LiveModelDirectory, ModelDirectory, StaticModelDirectory};
pub use crate::settings::{JsonFileSettings, MemorySettings, SettingsStore};
pub use crate::sink::{BufferedSink, ChannelSink, ResponseSink, StreamChunk};
pub use crate::transport::TransportNode;
