//! Repository access for gitsage agents: a git executor and the tools that
//! expose the working tree and history to the model.

pub mod git;
pub mod tools;

pub use git::{GitCli, GitError, GitExecutor, validate_revision};
pub use tools::{Workspace, repository_tools};
