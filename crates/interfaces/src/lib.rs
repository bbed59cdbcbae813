pub mod events;
pub mod terminal;
pub mod traits;

pub use events::{ClientEvent, CommandState, OutputStream, Usage};
pub use terminal::TerminalSink;
pub use traits::{EnvironmentProbe, EventSink, TokenError, TokenProvider, UsageError, UsageReporter};
