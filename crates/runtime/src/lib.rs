pub mod actions;
pub mod agents;
pub mod context;
pub mod email;
pub mod invoker;
pub mod response;
mod runtime;
pub mod scheduler;
pub mod server;
pub mod triggers;

pub use actions::{ActionExecutor, ActionOutcome, ExecutionReport, OutcomeStatus};
pub use agents::{AgentQueue, AgentTask};
pub use context::{ContextBuilder, InvocationContext, InvocationKind, InvocationRequest};
pub use email::{Email, LogMailer, Mailer};
pub use invoker::{InvocationRecord, Invoker};
pub use response::{ModelResponse, RawAction, parse_model_response};
pub use runtime::{ContinuumRuntime, StatusReport, build_mailer, router_settings};
pub use scheduler::Scheduler;
pub use server::{AppState, serve};
pub use triggers::{TriggerDefinition, TriggerKind, TriggerRegistry, TriggerSpec};
