//! Persistence layer — conversation state, ai state, message log and users.

pub mod memory;
pub mod model;
pub mod rest_backend;
pub mod traits;

pub use memory::MemoryBackend;
pub use model::{AiStateRecord, ConversationState, Direction, FlowData, LoggedMessage, UserPatch};
pub use rest_backend::RestBackend;
pub use traits::Database;
