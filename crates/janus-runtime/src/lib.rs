//! The Janus agent runtime: the message bus and its dispatcher, the
//! session store, the context builder, the durable scheduler, the
//! summarizer, the learner, and the agent loop that ties them together.

pub mod agent;
pub mod bus;
pub mod context;
pub mod heartbeat;
pub mod learner;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod summarizer;

pub use agent::{AgentLoop, DirectOptions, ProcessOutcome};
pub use bus::{ChannelHandler, MessageBus};
pub use context::ContextBuilder;
pub use heartbeat::{parse_heartbeat, sync_heartbeat};
pub use learner::{ExecutionRecord, Learner, Outcome, Recommendation};
pub use runtime::Runtime;
pub use scheduler::{CronJob, CronRun, JobPatch, NewJob, ScheduleKind, Scheduler, compute_next_run};
pub use session::{Session, SessionStore, session_key, strip_orphan_tool_prefix};
pub use summarizer::Summarizer;
