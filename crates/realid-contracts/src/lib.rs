pub mod chat;
pub mod conversation;
pub mod error;
pub mod events;
pub mod history;
pub mod prompt;
pub mod request;
pub mod session;

pub use conversation::{resolve_reference, ChatTurn, ConversationSnapshot, Role};
pub use error::{StudioError, StudioResult};
pub use history::HistoryStack;
pub use request::{AspectRatio, CameraMode, EncodedImage, GenerationRequestSpec};
