pub mod approval;
pub mod clock;
pub mod context;
pub mod cost;
pub mod error;
pub mod event_bus;
pub mod memory;
pub mod reminders;
pub mod tool_runner;
pub mod turn;
pub mod user_message;

pub use approval::{ApprovalDecision, ApprovalGate};
pub use clock::{Clock, Ids, SystemClock, UuidIds};
pub use context::{message_to_provider, ContextBuilderPort, DefaultContextBuilder};
pub use cost::{CostCalculator, CostPort};
pub use error::EngineError;
pub use event_bus::{EventBusPort, EventSinkHandle, InMemoryEventBus};
pub use memory::{FileBackedStore, InMemoryStore, MemoryStore};
pub use reminders::{NoopReminders, ReminderPort, StaticReminders};
pub use tool_runner::{RegistryToolRunner, ToolRunnerPort};
pub use turn::{Engine, EnginePorts, SendOptions, TurnOutcome};
pub use user_message::build_user_message;
