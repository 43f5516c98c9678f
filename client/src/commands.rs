//! Slash-command parsing for terminal input.
//!
//! Lines starting with `/` become commands; everything else is chat.

/// Parsed user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain chat line
    Chat(String),
    /// `/nick <name>`
    Nick(String),
    /// `/join <room>`
    Join(String),
    /// `/send <path>`
    SendFile(String),
    /// `/clear`
    Clear,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// Slash command outside the known set
    Unknown(String),
    /// Blank line or argument missing (usage already reported)
    Usage(&'static str),
    /// Nothing to do
    Empty,
}

/// Text shown by `/help`.
pub const HELP_TEXT: &str = "commands:\n  /nick <name>   change display name\n  /join <room>   switch rooms\n  /send <path>   send a file to the room\n  /clear         clear the screen\n  /help          show this help\n  /quit          disconnect and exit";

/// Parse one input line.
pub fn parse(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Chat(line.to_string());
    }

    let mut parts = line.trim().splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_lowercase();
    let argument = parts.next().map(str::trim).unwrap_or_default();

    match command.as_str() {
        "/nick" => {
            if argument.is_empty() {
                Command::Usage("usage: /nick <new name>")
            } else {
                Command::Nick(argument.to_string())
            }
        }
        "/join" => {
            if argument.is_empty() {
                Command::Usage("usage: /join <room>")
            } else {
                Command::Join(argument.to_string())
            }
        }
        "/send" => {
            if argument.is_empty() {
                Command::Usage("usage: /send <filepath>")
            } else {
                Command::SendFile(argument.to_string())
            }
        }
        "/clear" => Command::Clear,
        "/help" => Command::Help,
        "/quit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}
