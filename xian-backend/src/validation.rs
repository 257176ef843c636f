/// Input validation for dashboard console input
use thiserror::Error;

/// Longest raw console command forwarded to the game
pub const MAX_COMMAND_LEN: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Command cannot be empty")]
    CommandEmpty,

    #[error("Command must start with '/'")]
    CommandNotSlash,

    #[error("Command too long (max {max} characters, got {actual})")]
    CommandTooLong { max: usize, actual: usize },

    #[error("Command contains control characters")]
    CommandControlChars,
}

/// Validates a raw command typed into the dashboard console
///
/// Rules:
/// - Cannot be empty
/// - Must start with '/'
/// - Max 256 characters
/// - No control characters (newlines would split the chat packet)
pub fn validate_console_command(command: &str) -> Result<(), ValidationError> {
    if command.is_empty() {
        return Err(ValidationError::CommandEmpty);
    }

    if !command.starts_with('/') {
        return Err(ValidationError::CommandNotSlash);
    }

    let len = command.chars().count();
    if len > MAX_COMMAND_LEN {
        return Err(ValidationError::CommandTooLong {
            max: MAX_COMMAND_LEN,
            actual: len,
        });
    }

    if command.chars().any(char::is_control) {
        return Err(ValidationError::CommandControlChars);
    }

    Ok(())
}
