//! Core of the gatekeeper engine: run records, gates, the orchestrator and
//! the services validators reach through their context.

pub mod artifacts;
pub mod assets;
pub mod broker;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod gate;
pub mod git;
pub mod manifest;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod patterns;
pub mod process;
pub mod run;
pub mod runners;
pub mod schemas;
pub mod service;
pub mod time;
pub mod validator;
