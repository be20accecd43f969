//! Core services: OS enforcement, IDS supervision, event aggregation, and
//! notification gating. The facade in `commands` composes these.

pub mod aggregator;
pub mod enforcer;
pub mod notifier;
pub mod supervisor;

pub use aggregator::{EventAggregator, ExtractSummary, FlowReport, FreqEntry};
pub use enforcer::{HostsSinkhole, MemoryEnforcer, OsEnforcer, PolicyEnforcer};
pub use notifier::{Notification, NotificationGate, NotificationKind};
pub use supervisor::{IdsConfig, IdsState, IdsSupervisor};
