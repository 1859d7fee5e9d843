use crate::common::error::{QzError, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Read one line from the terminal. Ctrl-C maps to `QzError::Interrupted`.
pub fn ask(prompt: &str) -> Result<String> {
    let mut rl = DefaultEditor::new().map_err(readline_error)?;
    match rl.readline(prompt) {
        Ok(line) => Ok(line.trim().to_string()),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Err(QzError::Interrupted),
        Err(e) => Err(readline_error(e)),
    }
}

/// `[y/N]` confirmation; anything but `y` declines.
pub fn confirm(question: &str) -> Result<bool> {
    let answer = ask(&format!("{} [y/N] ", question))?;
    Ok(answer.eq_ignore_ascii_case("y"))
}

pub fn ask_password(prompt: &str) -> Result<String> {
    Ok(rpassword::prompt_password(prompt)?.trim().to_string())
}

fn readline_error(e: ReadlineError) -> QzError {
    match e {
        ReadlineError::Io(io) => QzError::Io(io),
        other => QzError::Io(std::io::Error::other(other.to_string())),
    }
}
