//! Control command table and parser.
//!
//! Commands are single tokens on a line, matched after trimming and
//! lowercasing.

/// Operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// List commands.
    Help,
    /// Stop the relay and end the control loop.
    Quit,
    /// Invert data forwarding.
    ToggleForwarding,
    /// Switch logging to DEBUG.
    LogDebug,
    /// Switch logging to INFO.
    LogInfo,
}

/// Command tokens, in the order help lists them.
pub const COMMANDS: &[(&str, Command, &str)] = &[
    ("?", Command::Help, "Show help"),
    ("q", Command::Quit, "Terminate application"),
    ("t", Command::ToggleForwarding, "Toggle data forwarding"),
    ("ld", Command::LogDebug, "Change log level to DEBUG"),
    ("li", Command::LogInfo, "Change log level to INFO"),
];

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// Blank line.
    Empty,
    /// Known command.
    Complete(Command),
    /// Normalized token that matched nothing.
    Unknown(String),
}

/// Parse one line of operator input.
pub fn parse(line: &str) -> ParseResult {
    let token = line.trim().to_ascii_lowercase();
    if token.is_empty() {
        return ParseResult::Empty;
    }

    COMMANDS
        .iter()
        .find(|(name, _, _)| *name == token)
        .map(|(_, command, _)| ParseResult::Complete(*command))
        .unwrap_or(ParseResult::Unknown(token))
}

/// Help text, one line per command.
pub fn help_lines() -> impl Iterator<Item = String> {
    COMMANDS
        .iter()
        .map(|(name, _, description)| format!("{name} - {description}"))
}
