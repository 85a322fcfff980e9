//! Bang command parsing for the REPL.
//!
//! Input starting with `!` controls the session instead of being sent as a
//! prompt.

use crate::types::ConversationId;

/// A parsed REPL command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Display help information.
    Help,

    /// Forget the current conversation.
    Reset,

    /// Show the loaded configuration.
    ShowConfig,

    /// List the most recent conversations.
    List,

    /// Undo the given number of asks.
    Rollback(usize),

    /// Continue an existing conversation.
    Set(ConversationId),

    /// Delete a conversation.
    Remove(ConversationId),

    /// Rename the current conversation.
    Title(String),

    /// Show the message history of a conversation.
    History(ConversationId),

    /// Exit the REPL.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for bang commands.
///
/// Returns `None` when the input is a prompt.
///
/// ```
/// # use revchat::commands::{parse_command, ChatCommand};
/// assert_eq!(parse_command("!rollback 2"), Some(ChatCommand::Rollback(2)));
/// assert!(parse_command("What is a monad?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim().strip_prefix('!')?;

    let mut parts = input.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "help" => ChatCommand::Help,
        "reset" => ChatCommand::Reset,
        "config" => ChatCommand::ShowConfig,
        "list" => ChatCommand::List,
        "rollback" => match argument {
            None => ChatCommand::Rollback(1),
            Some(arg) => match arg.parse::<usize>() {
                Ok(turns) if turns > 0 => ChatCommand::Rollback(turns),
                _ => ChatCommand::Invalid("!rollback expects a positive integer".to_string()),
            },
        },
        "set" => conversation_command(argument, ChatCommand::Set, "!set"),
        "rm" => conversation_command(argument, ChatCommand::Remove, "!rm"),
        "history" => conversation_command(argument, ChatCommand::History, "!history"),
        "title" => match argument {
            Some(title) => ChatCommand::Title(title.to_string()),
            None => ChatCommand::Invalid("!title requires a title".to_string()),
        },
        "quit" | "exit" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: !{command}")),
    };

    Some(result)
}

fn conversation_command<F>(argument: Option<&str>, constructor: F, name: &str) -> ChatCommand
where
    F: Fn(ConversationId) -> ChatCommand,
{
    match argument {
        Some(id) if !id.contains(char::is_whitespace) => constructor(ConversationId::new(id)),
        Some(_) => ChatCommand::Invalid(format!("{name} takes a single conversation id")),
        None => ChatCommand::Invalid(format!("{name} requires a conversation id")),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Commands:
  !help                  Show this message
  !reset                 Forget the current conversation
  !config                Show the loaded configuration
  !list                  List the last 20 conversations
  !rollback [n]          Undo the last n questions (default 1)
  !set <id>              Continue conversation <id>
  !rm <id>               Delete conversation <id>
  !title <title>         Rename the current conversation
  !history <id>          Show the messages of conversation <id>
  !quit                  Exit

Press enter twice to submit your question."#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_commands() {
        assert_eq!(parse_command("!help"), Some(ChatCommand::Help));
        assert_eq!(parse_command("  !RESET "), Some(ChatCommand::Reset));
        assert_eq!(parse_command("!config"), Some(ChatCommand::ShowConfig));
        assert_eq!(parse_command("!list"), Some(ChatCommand::List));
        assert_eq!(parse_command("!quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("!exit"), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_rollback() {
        assert_eq!(parse_command("!rollback"), Some(ChatCommand::Rollback(1)));
        assert_eq!(parse_command("!rollback 3"), Some(ChatCommand::Rollback(3)));
        assert!(matches!(
            parse_command("!rollback zero"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("positive")
        ));
        assert!(matches!(
            parse_command("!rollback 0"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_conversation_commands() {
        assert_eq!(
            parse_command("!set 5f1c"),
            Some(ChatCommand::Set(ConversationId::new("5f1c")))
        );
        assert_eq!(
            parse_command("!rm 5f1c"),
            Some(ChatCommand::Remove(ConversationId::new("5f1c")))
        );
        assert_eq!(
            parse_command("!history 5f1c"),
            Some(ChatCommand::History(ConversationId::new("5f1c")))
        );
        assert!(matches!(
            parse_command("!set"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
        assert!(matches!(
            parse_command("!rm a b"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("single")
        ));
    }

    #[test]
    fn parse_title_keeps_spaces() {
        assert_eq!(
            parse_command("!title Rust lifetimes"),
            Some(ChatCommand::Title("Rust lifetimes".to_string()))
        );
        assert!(matches!(parse_command("!title"), Some(ChatCommand::Invalid(_))));
    }

    #[test]
    fn unknown_and_non_commands() {
        assert_eq!(
            parse_command("!frobnicate"),
            Some(ChatCommand::Invalid("Unknown command: !frobnicate".to_string()))
        );
        assert_eq!(parse_command("Hello there"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("say !help"), None);
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for command in [
            "!help", "!reset", "!config", "!list", "!rollback", "!set", "!rm", "!title",
            "!history", "!quit",
        ] {
            assert!(help.contains(command), "missing {command}");
        }
    }
}
