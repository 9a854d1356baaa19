//! Prompt surface
//!
//! The engine asks questions through the [`Display`] trait only. Two
//! implementations ship: [`TerminalDisplay`] reads answers from stdin, and
//! [`NoninteractiveDisplay`] answers with defaults and reports a missing
//! flag for anything that has none.

use std::io::{self, BufRead, Write};

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::DisplayError;

/// Answer to a menu prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuResponse {
    /// Index into the offered choices
    Ok(usize),
    Cancel,
}

/// Interactive prompts used by the engine
pub trait Display: Send + Sync {
    /// Show a message that needs no answer
    fn notification(&self, message: &str);

    /// Ask a yes/no question
    fn yesno(
        &self,
        message: &str,
        yes_label: &str,
        no_label: &str,
        cli_flag: Option<&str>,
    ) -> Result<bool, DisplayError>;

    /// Offer a numbered list of choices
    fn menu(
        &self,
        message: &str,
        choices: &[String],
        default: Option<usize>,
        cli_flag: Option<&str>,
    ) -> Result<MenuResponse, DisplayError>;

    /// Ask for free text; `None` when the user cancels
    fn input(&self, message: &str, cli_flag: Option<&str>) -> Result<Option<String>, DisplayError>;
}

// ============================================================================
// Terminal
// ============================================================================

struct TerminalIo {
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
}

impl TerminalIo {
    /// Read one trimmed line, `None` on end of input
    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.writer.flush()?;
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

/// Line-oriented prompts on a terminal
pub struct TerminalDisplay {
    io: Mutex<TerminalIo>,
}

impl TerminalDisplay {
    /// Prompt on stdin/stdout
    pub fn new() -> Self {
        Self::with_io(io::BufReader::new(io::stdin()), io::stdout())
    }

    /// Prompt on arbitrary streams
    pub fn with_io(reader: impl BufRead + Send + 'static, writer: impl Write + Send + 'static) -> Self {
        Self {
            io: Mutex::new(TerminalIo {
                reader: Box::new(reader),
                writer: Box::new(writer),
            }),
        }
    }
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TerminalDisplay {
    fn notification(&self, message: &str) {
        let mut io = self.io.lock();
        let rule = "-".repeat(79);
        // A closed stdout is not worth failing the run over
        let _ = writeln!(io.writer, "{}\n{}\n{}", rule, message, rule);
    }

    fn yesno(
        &self,
        message: &str,
        yes_label: &str,
        no_label: &str,
        _cli_flag: Option<&str>,
    ) -> Result<bool, DisplayError> {
        let mut io = self.io.lock();
        writeln!(io.writer, "\n{}", message)?;
        loop {
            write!(
                io.writer,
                "{} ({}) / {} ({}): ",
                yes_label,
                yes_label.chars().next().unwrap_or('y').to_ascii_lowercase(),
                no_label,
                no_label.chars().next().unwrap_or('n').to_ascii_lowercase(),
            )?;
            let Some(answer) = io.read_line()? else {
                return Ok(false);
            };
            let answer = answer.to_lowercase();
            if answer.is_empty() {
                continue;
            }
            if yes_label.to_lowercase().starts_with(&answer) || answer == "y" || answer == "yes" {
                return Ok(true);
            }
            if no_label.to_lowercase().starts_with(&answer) || answer == "n" || answer == "no" {
                return Ok(false);
            }
        }
    }

    fn menu(
        &self,
        message: &str,
        choices: &[String],
        default: Option<usize>,
        _cli_flag: Option<&str>,
    ) -> Result<MenuResponse, DisplayError> {
        let mut io = self.io.lock();
        writeln!(io.writer, "\n{}", message)?;
        for (i, choice) in choices.iter().enumerate() {
            writeln!(io.writer, "{}: {}", i + 1, choice)?;
        }
        loop {
            write!(
                io.writer,
                "Select the appropriate number [1-{}] then [enter] (press 'c' to cancel): ",
                choices.len()
            )?;
            let Some(answer) = io.read_line()? else {
                return Ok(MenuResponse::Cancel);
            };
            if answer.eq_ignore_ascii_case("c") {
                return Ok(MenuResponse::Cancel);
            }
            if answer.is_empty() {
                if let Some(index) = default {
                    return Ok(MenuResponse::Ok(index));
                }
                continue;
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=choices.len()).contains(&n) => return Ok(MenuResponse::Ok(n - 1)),
                _ => writeln!(io.writer, "** Invalid input **")?,
            }
        }
    }

    fn input(&self, message: &str, _cli_flag: Option<&str>) -> Result<Option<String>, DisplayError> {
        let mut io = self.io.lock();
        write!(io.writer, "{} (Enter 'c' to cancel): ", message)?;
        match io.read_line()? {
            Some(answer) if answer != "c" => Ok(Some(answer)),
            _ => Ok(None),
        }
    }
}

// ============================================================================
// Non-interactive
// ============================================================================

/// Display for unattended runs
///
/// Notifications are printed; menus resolve to their default; anything
/// else fails with a missing-flag error naming the flag to pass.
pub struct NoninteractiveDisplay {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl NoninteractiveDisplay {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

impl Default for NoninteractiveDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for NoninteractiveDisplay {
    fn notification(&self, message: &str) {
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{}", message);
    }

    fn yesno(
        &self,
        message: &str,
        _yes_label: &str,
        _no_label: &str,
        cli_flag: Option<&str>,
    ) -> Result<bool, DisplayError> {
        Err(DisplayError::missing_flag(message, cli_flag))
    }

    fn menu(
        &self,
        message: &str,
        _choices: &[String],
        default: Option<usize>,
        cli_flag: Option<&str>,
    ) -> Result<MenuResponse, DisplayError> {
        match default {
            Some(index) => {
                debug!(choice = index, "Non-interactive menu answered with default");
                Ok(MenuResponse::Ok(index))
            }
            None => Err(DisplayError::missing_flag(message, cli_flag)),
        }
    }

    fn input(&self, message: &str, cli_flag: Option<&str>) -> Result<Option<String>, DisplayError> {
        Err(DisplayError::missing_flag(message, cli_flag))
    }
}
