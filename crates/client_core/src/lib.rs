//! Client side of the chat: the command surface a presentation layer calls,
//! and the backends it can talk to.

pub mod backend;
pub mod conversation;
pub mod error;
pub mod http;
pub mod instance_lock;
pub mod launcher;
pub mod memory;
pub mod profile;
pub mod runner;
pub mod surface;
pub mod validation;

pub use backend::{ChatBackend, EventStream};
pub use conversation::ConversationSession;
pub use error::{CommandError, ErrorCategory, ErrorReply};
pub use http::HttpBackend;
pub use instance_lock::InstanceLock;
pub use launcher::{Launcher, SystemLauncher};
pub use memory::InMemoryBackend;
pub use profile::{Profile, ProfileStore};
pub use surface::{CommandSurface, SurfaceConfig};
pub use validation::{CheckTicket, NicknameChecker, NicknameStatus};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
