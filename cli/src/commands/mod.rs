use crate::config::AppConfig;
use clap::Subcommand;

pub mod agents;
pub mod runner;
pub mod sessions;

/// How a successful command wants the process to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    Interrupted,
}

#[derive(Subcommand, PartialEq, Debug)]
pub enum SessionCommands {
    /// List stored sessions, newest first
    #[command(name = "list", alias = "ls")]
    List,
    /// Show one session
    Show {
        /// Session id
        id: String,
    },
    /// Delete one session
    #[command(alias = "rm")]
    Delete {
        /// Session id
        id: String,
    },
    /// Delete all but the most recent sessions
    Prune {
        /// Sessions to keep (defaults to sessions.max_keep)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand, PartialEq, Debug)]
pub enum Commands {
    /// Write a commit message for the staged changes
    Commit {
        /// Resume an interrupted session
        #[arg(long)]
        resume: Option<String>,
        /// Extra context for the agent (issue, intent, ...)
        #[arg(long)]
        context: Option<String>,
        /// Commit the staged changes with the generated message
        #[arg(long, default_value_t = false)]
        apply: bool,
    },

    /// Write a pull request title and description for the current branch
    Pr {
        /// Branch the pull request targets
        #[arg(long, default_value = "main")]
        base: String,
        /// Resume an interrupted session
        #[arg(long)]
        resume: Option<String>,
        /// Extra context for the agent
        #[arg(long)]
        context: Option<String>,
    },

    /// Summarise recent work
    Report {
        /// Report commits after this revision (default: recent history)
        #[arg(long)]
        since: Option<String>,
        /// Resume an interrupted session
        #[arg(long)]
        resume: Option<String>,
        /// Extra context for the agent
        #[arg(long)]
        context: Option<String>,
    },

    /// Investigate a problem in the repository
    Debug {
        /// Description of the problem
        #[arg(required_unless_present = "resume")]
        problem: Option<String>,
        /// Resume an interrupted session
        #[arg(long)]
        resume: Option<String>,
        /// Let the agent edit files
        #[arg(long, default_value_t = false)]
        allow_write: bool,
    },

    /// Manage stored sessions
    #[command(subcommand)]
    Sessions(SessionCommands),
}

impl Commands {
    pub async fn run(self, config: AppConfig) -> anyhow::Result<Exit> {
        match self {
            Commands::Commit {
                resume,
                context,
                apply,
            } => agents::commit(&config, resume, context, apply).await,
            Commands::Pr {
                base,
                resume,
                context,
            } => agents::pr(&config, base, resume, context).await,
            Commands::Report {
                since,
                resume,
                context,
            } => agents::report(&config, since, resume, context).await,
            Commands::Debug {
                problem,
                resume,
                allow_write,
            } => agents::debug(&config, problem, resume, allow_write).await,
            Commands::Sessions(command) => {
                sessions::run(&config, command).await?;
                Ok(Exit::Success)
            }
        }
    }
}
