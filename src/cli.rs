//! CLI struct definitions for the gatekeeper command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "gatekeeper",
    version = env!("CARGO_PKG_VERSION"),
    about = "Gate-based validation of AI-generated changes: sanitize the task, verify the test contract, check the implementation, guard the rest of the project."
)]
pub(crate) struct Cli {
    /// Project root (defaults to the current working directory).
    #[clap(short, long, global = true)]
    pub dir: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, default_value = "text")]
    pub format: String,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Write `.gatekeeper/config.toml` and ignore gatekeeper's generated state
    Init {
        /// Overwrite an existing config file.
        #[clap(long)]
        force: bool,
    },
    /// Create and execute a CONTRACT run
    Run(RunCli),
    /// Validate an implementation against a PASSED contract run
    Execution {
        /// Id of the PASSED CONTRACT run.
        #[clap(long = "contract-run")]
        contract: String,
        /// Ref holding the implementation.
        #[clap(long = "target")]
        target_ref: String,
    },
    /// Show a run with its gate and validator results
    Show {
        run_id: String,
    },
    /// Re-execute one gate of a finished run, inheriting the other gates
    Rerun {
        run_id: String,
        /// Gate number 0..3.
        #[clap(long)]
        gate: u8,
    },
    /// Rerun a finished run with one more validator bypassed
    Bypass {
        run_id: String,
        /// Validator code, e.g. TASK_CLARITY_CHECK.
        #[clap(long = "validator")]
        code: String,
    },
    /// Commit the working tree for a PASSED EXECUTION run
    Commit {
        run_id: String,
        #[clap(short, long)]
        message: String,
        /// Push after committing.
        #[clap(long)]
        push: bool,
        #[clap(long, default_value = "origin")]
        remote: String,
        /// Branch to push (defaults to the run's target ref).
        #[clap(long)]
        branch: Option<String>,
    },
    /// List the validator catalogue
    Validators,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunCli {
    /// Task prompt text.
    #[clap(long, conflicts_with = "prompt_file")]
    pub prompt: Option<String>,
    /// File holding the task prompt.
    #[clap(long)]
    pub prompt_file: Option<PathBuf>,
    /// Validation manifest JSON file.
    #[clap(long)]
    pub manifest: PathBuf,
    /// Test file, project-relative or absolute.
    #[clap(long)]
    pub test_file: Option<String>,
    /// Artifact store key the test file was produced under.
    #[clap(long)]
    pub output_id: Option<String>,
    /// Ref the implementation is measured against (defaults to HEAD).
    #[clap(long = "base")]
    pub base_ref: Option<String>,
    /// Ref holding the change (defaults to the current ref).
    #[clap(long = "target")]
    pub target_ref: Option<String>,
    /// Validator codes to bypass (repeatable).
    #[clap(long = "bypass")]
    pub bypass: Vec<String>,
    /// Record the run as PENDING without executing it.
    #[clap(long)]
    pub no_execute: bool,
}
