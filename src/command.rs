//! The command language typed after `:`.

use crate::process::Role;

/// A parsed command-line entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Restart(Role),
    Unknown(String),
}

impl Command {
    /// Parses a single bare word. Matching is literal and case-sensitive.
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "quit" | "q" => Command::Quit,
            "server-restart" => Command::Restart(Role::Server),
            "client-restart" => Command::Restart(Role::Client),
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Names shown in the help overlay.
pub const COMMAND_HELP: &[(&str, &str)] = &[
    ("quit, q", "Stop both processes and exit"),
    ("server-restart", "Restart the server process"),
    ("client-restart", "Restart the client process"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("quit"), Command::Quit);
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse("server-restart"), Command::Restart(Role::Server));
        assert_eq!(Command::parse("client-restart"), Command::Restart(Role::Client));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(
            Command::parse("Server-Restart"),
            Command::Unknown("Server-Restart".to_string())
        );
        assert_eq!(Command::parse("QUIT"), Command::Unknown("QUIT".to_string()));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(Command::parse("  client-restart "), Command::Restart(Role::Client));
    }

    #[test]
    fn unknown_words_are_kept_for_reporting() {
        assert_eq!(
            Command::parse("bogus-command"),
            Command::Unknown("bogus-command".to_string())
        );
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }
}
