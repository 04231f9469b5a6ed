//! Message timeline over finished recording artifacts.

mod message;
mod store;

pub use message::VoiceMessage;
pub use store::MessageStore;
