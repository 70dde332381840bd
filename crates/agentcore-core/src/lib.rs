pub mod config;
pub mod error;
pub mod model;
pub mod types;

pub use config::AgentCoreConfig;
pub use error::{AgentCoreError, Result};
pub use types::{AgentId, ConnId, Date, MessageId, ModelId, Period, SessionId, UserId, UserRole};
