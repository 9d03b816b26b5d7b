//! Connectivity-driven synchronization of the queues with the remote service.

pub mod connectivity;
pub mod gateway;
pub mod http;
pub mod orchestrator;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::{ConnectivityMonitor, ManualConnectivity, NetworkStatus};
pub use gateway::RemoteGateway;
pub use http::HttpGateway;
pub use orchestrator::{
  OrchestratorState, QueueSummary, SkipReason, SubmitOutcome, SyncOptions, SyncOrchestrator,
  SyncOutcome,
};
pub use session::{SessionState, SyncSession, SyncTrigger};
