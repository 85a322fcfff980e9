// Public modules
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod observability;
pub mod session;
pub mod state;
pub mod stream;
pub mod transport;
pub mod types;

// Re-exports
pub use config::{Authenticator, Config, Credentials, SessionConfig};
pub use error::{Error, Result};
pub use logger::{NoopLogger, SessionLogger, TracingLogger};
pub use observability::register_biometrics;
pub use session::{AnswerStream, AskRequest, Session};
pub use state::{ConversationState, Resolution, Target};
pub use stream::{LineOutcome, Skip, parse_events, parse_line};
pub use transport::{HttpTransport, LineStream, RawResponse, StreamResponse, Transport};
pub use types::*;
