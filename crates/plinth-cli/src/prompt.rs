use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use thiserror::Error;

/// Raised when the input stream ends while a prompt is waiting.
#[derive(Debug, Error)]
#[error("input closed")]
pub struct InputClosed;

/// Line-oriented terminal prompts.
///
/// Generic over its streams so the interactive flows can be driven by
/// scripted input; only [`Prompter::stdio`] masks secrets.
pub struct Prompter<R, W> {
    input: R,
    output: W,
    mask_secrets: bool,
}

impl Prompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self {
            input: io::stdin().lock(),
            output: io::stdout(),
            mask_secrets: true,
        }
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            mask_secrets: false,
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn say(&mut self, text: impl AsRef<str>) -> Result<()> {
        writeln!(self.output, "{}", text.as_ref()).context("failed to write to terminal")
    }

    /// Prints `prompt` and reads one trimmed line.
    pub fn ask(&mut self, prompt: &str) -> Result<String> {
        self.read_raw(prompt).map(|line| line.trim().to_string())
    }

    /// Prints `prompt` and reads one line without its terminator.
    fn read_raw(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(InputClosed.into());
        }
        Ok(strip_line_ending(&line).to_string())
    }

    /// Numbered menu; `None` means the user went back with `0`. Invalid
    /// answers are asked again.
    pub fn choose<S: AsRef<str>>(&mut self, title: &str, items: &[S]) -> Result<Option<usize>> {
        loop {
            self.say(format!("\n{title}"))?;
            for (index, item) in items.iter().enumerate() {
                self.say(format!("  {}) {}", index + 1, item.as_ref()))?;
            }
            self.say("  0) Back")?;
            let answer = self.ask("> ")?;
            if answer == "0" {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(choice) if (1..=items.len()).contains(&choice) => return Ok(Some(choice - 1)),
                _ => self.say("Invalid selection. Try again.")?,
            }
        }
    }

    /// Y/n question. An empty answer takes `default`; anything unrecognised
    /// (or empty without a default) is `None`.
    pub fn yes_no(&mut self, prompt: &str, default: Option<bool>) -> Result<Option<bool>> {
        let hint = match default {
            Some(true) => "[Y/n]",
            Some(false) => "[y/N]",
            None => "[y/n]",
        };
        let answer = self.ask(&format!("{prompt} {hint}: "))?.to_lowercase();
        Ok(match answer.as_str() {
            "y" | "yes" | "1" | "true" => Some(true),
            "n" | "no" | "0" | "false" => Some(false),
            "" => default,
            _ => None,
        })
    }

    /// Question that is `true` unless explicitly declined.
    pub fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let answer = self.ask(&format!("{prompt} [Y/n]: "))?.to_lowercase();
        Ok(!matches!(answer.as_str(), "n" | "no" | "0"))
    }

    /// Reads a secret verbatim; only the line terminator is dropped.
    pub fn secret(&mut self, label: &str) -> Result<String> {
        if !self.mask_secrets {
            return self.read_raw(&format!("{label}: "));
        }
        write!(self.output, "{label}: ")?;
        self.output.flush()?;
        let secret = rpassword::read_password().context("failed to read secret")?;
        Ok(strip_line_ending(&secret).to_string())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ask("\nPress Enter to continue...").map(drop)
    }
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn prompter(input: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn printed(prompter: &Prompter<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(prompter.output()).into_owned()
    }

    #[test]
    fn choose_retries_until_valid() {
        let mut p = prompter("9\nabc\n2\n");
        let picked = p.choose("Select verb", &["on", "off"]).unwrap();
        assert_eq!(picked, Some(1));
        let out = printed(&p);
        assert_eq!(out.matches("Invalid selection").count(), 2);
        assert!(out.contains("  2) off"));
    }

    #[test]
    fn choose_zero_goes_back() {
        let mut p = prompter("0\n");
        assert_eq!(p.choose("Select", &["a"]).unwrap(), None);
    }

    #[test]
    fn yes_no_uses_default_on_empty() {
        let mut p = prompter("\nYES\nmaybe\n\n");
        assert_eq!(p.yes_no("Verify TLS", Some(false)).unwrap(), Some(false));
        assert_eq!(p.yes_no("Verify TLS", Some(false)).unwrap(), Some(true));
        assert_eq!(p.yes_no("Verify TLS", None).unwrap(), None);
        assert_eq!(p.yes_no("Verify TLS", None).unwrap(), None);
        assert!(printed(&p).contains("Verify TLS [y/N]: "));
    }

    #[test]
    fn confirm_defaults_to_yes() {
        let mut p = prompter("\nno\n");
        assert!(p.confirm("Dry-run?").unwrap());
        assert!(!p.confirm("Dry-run?").unwrap());
    }

    #[test]
    fn unmasked_secret_reads_a_line() {
        let mut p = prompter("hunter2\n");
        assert_eq!(p.secret("Password").unwrap(), "hunter2");
    }

    #[test]
    fn secret_keeps_surrounding_whitespace() {
        let mut p = prompter("  pass word \r\n");
        assert_eq!(p.secret("Password").unwrap(), "  pass word ");
        assert_eq!(strip_line_ending("tab\t\n"), "tab\t");
    }

    #[test]
    fn end_of_input_is_input_closed() {
        let mut p = prompter("");
        let err = p.ask("> ").unwrap_err();
        assert!(err.is::<InputClosed>());
    }
}
