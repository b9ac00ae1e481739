//! User-facing side effects: opening a browser and asking for confirmation

use std::io::{BufRead, Write};

use tracing::{info, warn};

use crate::Result;

/// Opens authorization URLs for the user
pub trait Browser: Send + Sync {
    /// Present `url` to the user
    ///
    /// # Errors
    ///
    /// Implementations may fail when the URL cannot be presented at all.
    fn open(&self, url: &str) -> Result<()>;
}

/// The desktop's default browser; prints the URL when none can be launched
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        info!("Opening browser for authorization");
        if let Err(e) = open::that(url) {
            warn!(error = %e, "Failed to open browser automatically");
        }
        eprintln!("\nIf the browser did not open, visit:\n{url}\n");
        Ok(())
    }
}

/// Answers yes/no questions before destructive or repeated actions
pub trait Confirm: Send + Sync {
    /// `true` to proceed
    fn confirm(&self, prompt: &str) -> bool;
}

/// Always proceeds (`--yes`, non-interactive callers)
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Always declines
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDecline;

impl Confirm for AlwaysDecline {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Reads `y`/`yes` from stdin, prompting on stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{prompt} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}
