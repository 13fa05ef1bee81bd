//! 核心编排层：错误与恢复、状态机、效果执行、实例 actor、Hub

pub mod builder;
pub mod effects;
pub mod error;
pub mod hub;
pub mod machine;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;

pub use builder::HubBuilder;
pub use effects::EffectRunner;
pub use error::{
    JournalError, OrchestratorError, PlanningError, StateError, ToolErrorKind, ToolExecutionError,
};
pub use hub::{OrchestratorHub, STARTER_PROMPT_PREFIX};
pub use machine::{Effect, EffectOutcome, WorkflowMachine, DEFAULT_MAX_PLANNING_STEPS};
pub use orchestrator::{InstanceState, OrchestratorDeps, OrchestratorHandle};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use retry::{RetryFailure, RetryPolicy};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{Phase, Signal, WorkflowSnapshot};
