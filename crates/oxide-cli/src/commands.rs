//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Migrate, start every poller and scheduler, and run until Ctrl-C
    Run,

    /// Run one poll cycle for every configured poller, then exit
    Poll,

    /// Apply database migrations
    Migrate,

    /// Validate the configuration file
    Validate,

    /// Inspect or edit a scheduler's persisted state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand)]
pub enum StateCommands {
    /// Print a state value as JSON
    Get {
        /// Scheduler name
        scheduler: String,

        /// State key
        key: String,
    },

    /// Store a JSON value under a key
    Set {
        /// Scheduler name
        scheduler: String,

        /// State key
        key: String,

        /// JSON value, e.g. '[1, 2]' or '"text"'
        value: String,
    },
}
