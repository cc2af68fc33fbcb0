//! User-facing output and interactive prompts
//!
//! Diagnostics go through `tracing`; everything the user is meant to read
//! as the result of a command goes through a [`Printer`] so tests can
//! capture it and script answers to prompts.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

pub trait Printer {
    /// Print one line of command output
    fn line(&self, msg: &str);

    /// Print a warning the user should notice
    fn warn(&self, msg: &str);

    /// Show a prompt and read a single line answer (without line terminator)
    fn ask(&self, prompt: &str) -> Result<String>;
}

/// Printer writing to the terminal and reading answers from stdin
pub struct ConsolePrinter;

impl Printer for ConsolePrinter {
    fn line(&self, msg: &str) {
        println!("{}", msg);
    }

    fn warn(&self, msg: &str) {
        eprintln!("Warning: {}", msg);
    }

    fn ask(&self, prompt: &str) -> Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{} ", prompt)?;
        stdout.flush()?;

        let mut answer = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("Failed to read answer from stdin")?;
        if read == 0 {
            anyhow::bail!("No answer available on stdin for prompt: {}", prompt);
        }
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[cfg(test)]
pub use scripted::ScriptedPrinter;
