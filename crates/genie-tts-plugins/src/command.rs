//! Chat commands: `/name args` lines addressed to a plugin.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use genie_tts_core::types::{MessageOrigin, Reply};

/// A command a user can type into the chat.
#[async_trait]
pub trait ChatCommand: Send + Sync {
    /// Name without the leading slash.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run the command. Each returned reply is sent as its own message.
    async fn execute(&self, origin: &MessageOrigin, args: &str) -> anyhow::Result<Vec<Reply>>;
}

/// Commands collected from all plugins, keyed by name.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn ChatCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. A later command with the same name replaces the
    /// earlier one.
    pub fn register(&mut self, command: Arc<dyn ChatCommand>) {
        let name = command.name().to_lowercase();
        if self.commands.insert(name.clone(), command).is_some() {
            warn!(command = %name, "Chat command replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChatCommand>> {
        self.commands.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    /// Dispatch a raw chat line.
    ///
    /// Returns `None` when the line is not a command or names no registered
    /// command. Command failures become a user-visible reply.
    pub async fn dispatch(&self, origin: &MessageOrigin, line: &str) -> Option<Vec<Reply>> {
        let (name, args) = parse_command_line(line)?;
        let command = self.get(name)?;
        debug!(command = %name, sender = %origin.sender_id, "Dispatching chat command");
        match command.execute(origin, args).await {
            Ok(replies) => Some(replies),
            Err(e) => {
                warn!(command = %name, error = %e, "Chat command failed");
                Some(vec![Reply::command_text(format!("Command failed: {e}"))])
            }
        }
    }
}

/// Split `/name rest of line` into `("name", "rest of line")`.
pub fn parse_command_line(line: &str) -> Option<(&str, &str)> {
    let body = line.trim().strip_prefix('/')?;
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };
    (!name.is_empty()).then_some((name, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ChatCommand for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeat the arguments"
        }

        async fn execute(&self, _origin: &MessageOrigin, args: &str) -> anyhow::Result<Vec<Reply>> {
            if args == "fail" {
                anyhow::bail!("refused");
            }
            Ok(vec![Reply::command_text(args)])
        }
    }

    #[test]
    fn test_parse_command_line() {
        assert_eq!(parse_command_line("/gentts test Hello  "), Some(("gentts", "test Hello")));
        assert_eq!(parse_command_line("  /gentts"), Some(("gentts", "")));
        assert_eq!(parse_command_line("gentts test"), None);
        assert_eq!(parse_command_line("/ test"), None);
    }

    #[tokio::test]
    async fn test_dispatch() {
        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(Echo));
        let origin = MessageOrigin::direct("42");

        let replies = registry.dispatch(&origin, "/ECHO hi there").await.unwrap();
        assert_eq!(replies[0].plain_text(), "hi there");

        assert!(registry.dispatch(&origin, "/unknown").await.is_none());
        assert!(registry.dispatch(&origin, "hello").await.is_none());

        let replies = registry.dispatch(&origin, "/echo fail").await.unwrap();
        assert_eq!(replies[0].plain_text(), "Command failed: refused");
        assert_eq!(registry.names(), vec!["echo"]);
    }
}
