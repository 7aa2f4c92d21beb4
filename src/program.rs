use anyhow::{Context, Error};
use console::Term;

use crate::canvas::CanvasArchiver;
use crate::canvas::io::Config;
use crate::canvas::sender::RequestSender;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// A program class that handles the flow of the archiver and steps of execution.
pub(crate) struct Program;

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new() -> Self {
        Self
    }

    /// Runs the archiver program.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("canvas archiver");
        trace!("Starting canvas archiver...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);

        // Pick up a .env file from the working directory before touching the
        // environment; a missing file is not an error.
        if dotenvy::dotenv().is_ok() {
            trace!("Loaded environment overrides from .env...");
        }

        // Configuration is validated before any network call is made.
        let config = Config::from_env()?;
        trace!("API URL: {}", config.api_url());
        trace!("API Token: {}", "*".repeat(config.api_token().len()));
        info!(
            "Archiving into {}",
            console::style(config.absolute_output_dir().display())
                .color256(39)
                .italic()
        );

        let request_sender = RequestSender::new(&config)?;

        // Authentication failure is fatal and aborts before any traversal.
        let user = request_sender
            .get_current_user()
            .context("Authentication failed. Check your token.")?;
        trace!("User ID: {}", user.id);
        info!(
            "Authenticated as {}",
            console::style(format!("\"{}\"", user.name)).color256(39).italic()
        );

        let mut archiver = CanvasArchiver::new(request_sender, &config)?;
        let summary = archiver.archive_all()?;

        info!("{}", "=".repeat(50));
        info!(
            "Archival complete: {} archived, {} skipped, {} failed, {} warnings.",
            summary.archived, summary.skipped, summary.failed, summary.warnings
        );

        Ok(())
    }
}
