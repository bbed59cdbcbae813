use crate::events::{ClientEvent, CommandState};
use crate::traits::EventSink;
use std::io::Write;

/// Plain-text rendering of client events on stdout.
pub struct TerminalSink;

impl TerminalSink {
    pub fn new() -> Self {
        Self
    }

    pub fn render(event: &ClientEvent) -> Option<String> {
        let line = match event {
            ClientEvent::CommandObserved {
                id,
                cmd,
                desc,
                report,
                state,
            } => match state {
                CommandState::PendingApproval => {
                    let reason = report
                        .as_ref()
                        .map(|r| format!(" [{:?}: {}]", r.category, r.reason))
                        .unwrap_or_default();
                    format!(
                        "⚠️  Approval required ({}): {}{}\n   {}\n   /approve {} or /decline {}",
                        id, cmd, reason, desc, id, id
                    )
                }
                CommandState::Running => format!("$ {}  # {} ({})", cmd, desc, id),
                CommandState::Declined => format!("✗ Declined ({}): {}", id, cmd),
            },
            ClientEvent::CommandOutput { chunk, .. } => chunk.clone(),
            ClientEvent::CommandFinished { id, success } => {
                if *success {
                    format!("✓ Finished ({})", id)
                } else {
                    format!("✗ Stopped ({})", id)
                }
            }
            ClientEvent::CredentialRequested { message } => {
                format!("🔑 {}\n   /sudo to enter the password, /nosudo to refuse", message)
            }
            ClientEvent::CredentialResult { success } => {
                if *success {
                    "🔑 Password accepted".to_string()
                } else {
                    "🔑 Password rejected".to_string()
                }
            }
            ClientEvent::UsageUpdated(usage) => format!(
                "ℹ️  Tokens: {} total ({} prompt, {} completion)",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            ),
            ClientEvent::AssistantMessage { message, .. } => format!("🤖 {}", message),
            ClientEvent::Idle { .. } => return None,
            ClientEvent::ServerError { code, message } => format!("❌ {}: {}", code, message),
            ClientEvent::CreditsExhausted => "❌ Out of credits".to_string(),
            ClientEvent::Typing { .. } => return None,
            ClientEvent::ChatCleared => "ℹ️  New chat".to_string(),
            ClientEvent::Disconnected => "ℹ️  Disconnected".to_string(),
        };
        Some(line)
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for TerminalSink {
    fn emit(&self, event: ClientEvent) {
        let Some(text) = Self::render(&event) else {
            return;
        };

        let mut stdout = std::io::stdout().lock();
        let _ = match event {
            // Output chunks arrive mid-line; print them as they came.
            ClientEvent::CommandOutput { .. } => stdout.write_all(text.as_bytes()),
            _ => writeln!(stdout, "{}", text),
        };
        let _ = stdout.flush();
    }
}
