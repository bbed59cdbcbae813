//! Line-oriented terminal front end.
//!
//! Plain lines go to the agent as chat messages. Lines starting with `/` are
//! local commands answering approval and password prompts.

use anyhow::{Context, Result};
use std::sync::Arc;
use techie_core::Session;
use techie_executor::ElevationCredential;
use techie_policy::{SafetyLevel, SafetySettings, SettingsStore};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const HELP: &str = "\
Commands:
  <text>              Send a chat message
  /approve [id]       Run a command waiting for approval
  /decline [id]       Refuse a command waiting for approval
  /sudo               Enter the requested password
  /nosudo             Refuse the password request
  /cancel <id>        Kill a running command
  /cancel-all         Kill every running command
  /level [level]      Show or set the safety level (basic, cautious, critical)
  /new                Start a new chat
  /quit               Exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Chat(String),
    Approve(Option<String>),
    Decline(Option<String>),
    Sudo,
    NoSudo,
    Cancel(String),
    CancelAll,
    Level(Option<SafetyLevel>),
    New,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ReplCommand::Chat(line.to_string());
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::to_string);

    match name {
        "approve" | "y" => ReplCommand::Approve(arg),
        "decline" | "n" => ReplCommand::Decline(arg),
        "sudo" => ReplCommand::Sudo,
        "nosudo" => ReplCommand::NoSudo,
        "cancel" => match arg {
            Some(id) => ReplCommand::Cancel(id),
            None => ReplCommand::Invalid("usage: /cancel <id>".to_string()),
        },
        "cancel-all" => ReplCommand::CancelAll,
        "level" => match arg {
            None => ReplCommand::Level(None),
            Some(value) => match SafetyLevel::from_persisted(&value) {
                Some(level) => ReplCommand::Level(Some(level)),
                None => ReplCommand::Invalid(format!("unknown safety level '{}'", value)),
            },
        },
        "new" => ReplCommand::New,
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("unknown command '/{}'", other)),
    }
}

pub struct Repl {
    session: Session,
    settings: Arc<SettingsStore>,
}

impl Repl {
    pub fn new(session: Session, settings: Arc<SettingsStore>) -> Self {
        Self { session, settings }
    }

    pub async fn run(&self) -> Result<()> {
        println!("Techie terminal client. Type /help for commands.");
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let Some(line) = lines.next_line().await.context("Failed to read input")? else {
                break;
            };
            match parse(&line) {
                ReplCommand::Quit => {
                    if self.confirm_quit(&mut lines).await? {
                        break;
                    }
                }
                command => self.handle(command).await,
            }
        }

        self.session.shutdown().await;
        println!("👋 Goodbye!");
        Ok(())
    }

    async fn handle(&self, command: ReplCommand) {
        let orchestrator = self.session.orchestrator();
        match command {
            ReplCommand::Chat(text) => {
                if let Err(e) = self.session.send_chat(&text).await {
                    eprintln!("❌ Message not sent: {}", e);
                }
            }
            ReplCommand::Approve(id) => {
                let approved = self
                    .pending_or(id)
                    .is_some_and(|id| orchestrator.approve(&id));
                if !approved {
                    println!("ℹ️  Nothing is waiting for approval");
                }
            }
            ReplCommand::Decline(id) => {
                let declined = self
                    .pending_or(id)
                    .is_some_and(|id| orchestrator.decline(&id));
                if !declined {
                    println!("ℹ️  Nothing is waiting for approval");
                }
            }
            ReplCommand::Sudo => self.submit_password().await,
            ReplCommand::NoSudo => {
                if !orchestrator.cancel_credential() {
                    println!("ℹ️  No password was requested");
                }
            }
            ReplCommand::Cancel(id) => {
                if !orchestrator.cancel_process(&id) {
                    println!("ℹ️  No running command '{}'", id);
                }
            }
            ReplCommand::CancelAll => {
                let cancelled = orchestrator.cancel_all();
                println!("ℹ️  Stopped {} command(s)", cancelled);
            }
            ReplCommand::Level(None) => {
                let level = self.settings.safety_level().await;
                println!("ℹ️  Safety level: {}", level.as_str());
            }
            ReplCommand::Level(Some(level)) => match self.settings.save(level).await {
                Ok(()) => println!("ℹ️  Safety level set to {}", level.as_str()),
                Err(e) => eprintln!("❌ Safety level not saved: {}", e),
            },
            ReplCommand::New => self.session.reset().await,
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Invalid(message) => println!("❌ {}", message),
            ReplCommand::Quit | ReplCommand::Empty => {}
        }
    }

    /// `id`, or the oldest call waiting for approval.
    fn pending_or(&self, id: Option<String>) -> Option<String> {
        id.or_else(|| {
            self.session
                .orchestrator()
                .pending_approvals()
                .into_iter()
                .next()
        })
    }

    async fn submit_password(&self) {
        let orchestrator = self.session.orchestrator();
        if !orchestrator.awaiting_credential() {
            println!("ℹ️  No password was requested");
            return;
        }

        let password =
            match tokio::task::spawn_blocking(|| rpassword::prompt_password("Password: ")).await {
                Ok(Ok(password)) => password,
                Ok(Err(e)) => {
                    eprintln!("❌ Failed to read password: {}", e);
                    return;
                }
                Err(e) => {
                    eprintln!("❌ Password prompt failed: {}", e);
                    return;
                }
            };

        orchestrator.submit_credential(ElevationCredential::new(password));
    }

    async fn confirm_quit(&self, lines: &mut Lines<BufReader<Stdin>>) -> Result<bool> {
        if !self.session.has_active_processes() {
            return Ok(true);
        }

        println!("⚠️  Commands are still running. Quit and stop them? [y/N]");
        let answer = lines
            .next_line()
            .await
            .context("Failed to read input")?
            .unwrap_or_default();
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(
            parse("  list my files "),
            ReplCommand::Chat("list my files".to_string())
        );
        assert_eq!(parse("   "), ReplCommand::Empty);
    }

    #[test]
    fn test_approval_commands() {
        assert_eq!(parse("/approve t1"), ReplCommand::Approve(Some("t1".into())));
        assert_eq!(parse("/approve"), ReplCommand::Approve(None));
        assert_eq!(parse("/n"), ReplCommand::Decline(None));
    }

    #[test]
    fn test_cancel_needs_id() {
        assert_eq!(parse("/cancel t9"), ReplCommand::Cancel("t9".into()));
        assert!(matches!(parse("/cancel"), ReplCommand::Invalid(_)));
        assert_eq!(parse("/cancel-all"), ReplCommand::CancelAll);
    }

    #[test]
    fn test_level() {
        assert_eq!(parse("/level"), ReplCommand::Level(None));
        assert_eq!(
            parse("/level cautious"),
            ReplCommand::Level(Some(SafetyLevel::Cautious))
        );
        assert!(matches!(parse("/level reckless"), ReplCommand::Invalid(_)));
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(parse("/dance"), ReplCommand::Invalid(_)));
        assert_eq!(parse("/exit"), ReplCommand::Quit);
    }
}
