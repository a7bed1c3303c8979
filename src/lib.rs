//! Gatekeeper: gate-based validation of AI-generated changes.
//!
//! A change is checked in two runs. A CONTRACT run takes a task prompt, a
//! validation manifest (the files the change may touch) and a test file, and
//! runs two gates:
//!
//! - Gate 0, sanitization: token budget, task scope and clarity, sensitive
//!   files, test path convention.
//! - Gate 1, contract: the test parses, asserts, covers a failure path,
//!   fails before the implementation exists, and matches the manifest.
//!
//! An EXECUTION run validates the implementation on a target ref against a
//! passed contract:
//!
//! - Gate 2, execution: diff scope, test read-only, task test passes,
//!   compilation, lint.
//! - Gate 3, integrity: full regression suite, production build.
//!
//! A run stops at the first gate whose hard-block validators did not all
//! pass. A finished run can be rerun for one gate or with a validator
//! bypassed; the derived run re-executes that gate and inherits every other
//! gate the source passed. Bypasses carry over into EXECUTION runs.
//!
//! # Examples
//!
//! ```bash
//! gatekeeper init
//! gatekeeper run --prompt "Add a disabled state to Button" \
//!     --manifest manifest.json --test-file src/components/__tests__/Button.spec.tsx
//! gatekeeper execution --contract-run <RUN_ID> --target feature/button
//! gatekeeper commit <EXECUTION_RUN_ID> -m "Add disabled state" --push
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: run records and storage, gates, orchestration, git, tools
//! - [`validators`]: the twenty validators and their registry

pub mod core;
pub mod validators;

mod cli;

use crate::cli::{Cli, Command, RunCli};
use crate::core::error::GatekeeperError;
use crate::core::git::PushStatus;
use crate::core::run::{RunResults, RunStatus};
use crate::core::service::{GatekeeperService, RunRequest};
use crate::core::validator::{ValidatorCode, ValidatorStatus};
use crate::core::{assets, output, time};
use clap::Parser;
use colored::Colorize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

pub fn run() -> Result<ExitCode, GatekeeperError> {
    let cli = Cli::parse();
    let json = match cli.format.as_str() {
        "json" => true,
        "text" => false,
        other => {
            return Err(GatekeeperError::ValidationError(format!(
                "unknown format '{}', expected 'text' or 'json'",
                other
            )));
        }
    };
    let project_root = match cli.dir {
        Some(d) => d,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Command::Init { force } => {
            let report = assets::init_project(&project_root, force)?;
            if json {
                let envelope = time::command_envelope(
                    "init",
                    "ok",
                    serde_json::json!({
                        "configPath": report.config_path,
                        "configWritten": report.config_written,
                        "gitignoreEntriesAdded": report.gitignore_entries_added,
                    }),
                )?;
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            } else if report.config_written {
                println!("{} {}", "wrote".green(), report.config_path.display());
            } else {
                println!(
                    "{} {} (use --force to overwrite)",
                    "kept".yellow(),
                    report.config_path.display()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Validators => {
            print_catalogue(json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => {
            let service = GatekeeperService::open(&project_root)?;
            let no_execute = args.no_execute;
            let request = build_request(args, &project_root)?;
            let run = service.create_run(request)?;
            if no_execute {
                return report(&service, &run.id, "run", json);
            }
            let run = service.execute_run(&run.id)?;
            report(&service, &run.id, "run", json)
        }
        Command::Execution {
            contract,
            target_ref,
        } => {
            let service = GatekeeperService::open(&project_root)?;
            let run = service.create_execution_run(&contract, &target_ref)?;
            let run = service.execute_run(&run.id)?;
            report(&service, &run.id, "execution", json)
        }
        Command::Show { run_id } => {
            let service = GatekeeperService::open(&project_root)?;
            report(&service, &run_id, "show", json)
        }
        Command::Rerun { run_id, gate } => {
            let service = GatekeeperService::open(&project_root)?;
            let run = service.rerun_gate(&run_id, gate)?;
            report(&service, &run.id, "rerun", json)
        }
        Command::Bypass { run_id, code } => {
            let service = GatekeeperService::open(&project_root)?;
            let run = service.bypass_validator(&run_id, &code)?;
            report(&service, &run.id, "bypass", json)
        }
        Command::Commit {
            run_id,
            message,
            push,
            remote,
            branch,
        } => {
            let service = GatekeeperService::open(&project_root)?;
            let run = service.commit_run(&run_id, &message)?;
            let hash = run.commit_hash.clone().unwrap_or_default();
            let push_status = if push {
                let branch = branch.unwrap_or_else(|| run.target_ref.clone());
                Some(service.push_run(&run.id, &remote, &branch)?)
            } else {
                None
            };
            let pushed_ok = push_status
                .as_ref()
                .is_none_or(|s| matches!(s, PushStatus::Pushed));
            if json {
                let envelope = time::command_envelope(
                    "commit",
                    if pushed_ok { "ok" } else { "push_rejected" },
                    serde_json::json!({
                        "runId": run.id,
                        "commitHash": hash,
                        "push": push_status.as_ref().map(|s| serde_json::json!({
                            "code": s.code(),
                            "remediation": s.remediation(),
                        })),
                    }),
                )?;
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            } else {
                println!("{} {}", "committed".green().bold(), hash);
                if let Some(status) = &push_status {
                    if pushed_ok {
                        println!("{} {}", "pushed".green().bold(), remote);
                    } else {
                        println!("{} {}", status.code().red().bold(), status.remediation());
                    }
                }
            }
            Ok(if pushed_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn build_request(args: RunCli, project_root: &Path) -> Result<RunRequest, GatekeeperError> {
    let task_prompt = match (args.prompt, &args.prompt_file) {
        (Some(p), _) => p,
        (None, Some(file)) => read_input(project_root, file)?,
        (None, None) => {
            return Err(GatekeeperError::ValidationError(
                "a task prompt is required (--prompt or --prompt-file)".to_string(),
            ));
        }
    };
    let manifest_json = read_input(project_root, &args.manifest)?;
    let bypassed_validators = args
        .bypass
        .iter()
        .map(|c| c.parse::<ValidatorCode>())
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(RunRequest {
        task_prompt,
        manifest_json,
        test_file_path: args.test_file,
        output_id: args.output_id,
        base_ref: args.base_ref,
        target_ref: args.target_ref,
        bypassed_validators,
    })
}

fn read_input(project_root: &Path, path: &Path) -> Result<String, GatekeeperError> {
    let full: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    };
    fs::read_to_string(&full)
        .map_err(|e| GatekeeperError::PathError(format!("{}: {}", full.display(), e)))
}

/// Print a run's results. Exit status reflects whether the run PASSED.
fn report(
    service: &GatekeeperService,
    run_id: &str,
    cmd: &str,
    json: bool,
) -> Result<ExitCode, GatekeeperError> {
    let results = service.get_run_results(run_id)?;
    if json {
        let envelope = time::command_envelope(
            cmd,
            results.run.status.as_str(),
            serde_json::to_value(&results)?,
        )?;
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        print_results(&results);
    }
    Ok(match results.run.status {
        RunStatus::Passed | RunStatus::Pending => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn status_label(status: &str) -> colored::ColoredString {
    match status {
        "PASSED" => status.green().bold(),
        "FAILED" | "ABORTED" => status.red().bold(),
        "WARNING" => status.yellow().bold(),
        "SKIPPED" => status.dimmed(),
        _ => status.cyan(),
    }
}

fn print_results(results: &RunResults) {
    let run = &results.run;
    println!(
        "{} {} {}",
        run.run_type.as_str().bold(),
        run.id,
        status_label(run.status.as_str())
    );
    if let Some(source) = &run.rerun_of {
        println!("  rerun of {} at gate {}", source, run.start_gate);
    }
    if let Some(contract) = &run.contract_run_id {
        println!("  contract {}", contract);
    }
    if !run.bypassed_validators.is_empty() {
        let codes: Vec<&str> = run.bypassed_validators.iter().map(|c| c.as_str()).collect();
        println!("  bypassed {}", codes.join(", "));
    }

    for gate in &results.gate_results {
        println!(
            "\n{} {} {}",
            format!("Gate {}", gate.gate_number).as_str().bold(),
            gate.gate_name,
            status_label(gate.status.as_str())
        );
        for r in results
            .validator_results
            .iter()
            .filter(|r| r.gate_number == gate.gate_number)
        {
            let marker = if r.bypassed {
                "BYPASSED".magenta()
            } else {
                status_label(r.status.as_str())
            };
            let hard = if r.is_hard_block { "" } else { " (soft)" };
            println!(
                "  {:<9} {}{} {}",
                marker,
                r.code.as_str(),
                hard.dimmed(),
                output::compact_line(&r.message, 120)
            );
        }
    }

    if let Some(message) = &run.failure_message {
        println!("\n{} {}", "failure:".red().bold(), message);
    }
    if !run.warnings.is_empty() {
        println!(
            "{} {}",
            "warnings:".yellow().bold(),
            output::preview_messages(&run.warnings, 3, 160)
        );
    }
    if let Some(hash) = &run.commit_hash {
        println!("{} {}", "commit:".green().bold(), hash);
    }
}

fn print_catalogue(json: bool) -> Result<(), GatekeeperError> {
    if json {
        let entries: Vec<serde_json::Value> = ValidatorCode::ALL
            .iter()
            .map(|c| {
                serde_json::json!({
                    "code": c.as_str(),
                    "gate": c.gate().number(),
                    "order": c.order(),
                    "hardBlock": c.is_hard_block(),
                    "description": c.description(),
                })
            })
            .collect();
        let envelope = time::command_envelope(
            "validators",
            ValidatorStatus::Passed.as_str(),
            serde_json::json!({ "validators": entries }),
        )?;
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }
    let mut last_gate = None;
    for code in ValidatorCode::ALL {
        let gate = code.gate();
        if last_gate != Some(gate) {
            println!("{}", format!("Gate {} {}", gate.number(), gate.name()).as_str().bold());
            last_gate = Some(gate);
        }
        let kind = if code.is_hard_block() {
            "hard".red()
        } else {
            "soft".yellow()
        };
        println!("  {:<34} {}  {}", code.as_str(), kind, code.description());
    }
    Ok(())
}
