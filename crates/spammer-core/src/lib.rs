//! Core pipeline of the transaction spammer.
//!
//! A run flows through these stages:
//!
//! 1. nonce initialisation, one counter per sender
//! 2. contract deployment, recorded in storage
//! 3. generation: one worker per sender and workload builds and signs
//! 4. submission: a single stage sends everything to the endpoint
//! 5. watching: a sample of submitted transactions is polled for receipts
//!
//! The [`SpammerEngine`] owns the stages and their shutdown order; the
//! [`SpammerBuilder`] assembles it from configuration and pluggable
//! implementations.

pub mod builder;
pub mod deployer;
pub mod engine;
pub mod generator;
pub mod monitoring;
pub mod nonce;
pub mod sender;
pub mod tx;

pub use builder::{SpammerBuilder, SpammerFactories};
pub use engine::{RunReport, RunState, SpammerEngine};

use std::fmt;
use thiserror::Error;

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum SpammerError {
	/// Error related to configuration issues.
	#[error("Configuration error: {0}")]
	Config(String),
	/// The deployment phase failed.
	#[error("Deployment error: {0}")]
	Deployment(String),
	/// Workloads could not be prepared.
	#[error("Generation error: {0}")]
	Generation(String),
	/// A rejected submission stopped the run.
	#[error("Submission error: {0}")]
	Submission(String),
	/// Error from one of the services or a failed task.
	#[error("Service error: {0}")]
	Service(String),
}

/// Pipeline stage an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
	Deployment,
	Generation,
	Submission,
	Persistence,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Stage::Deployment => "deployment",
			Stage::Generation => "generation",
			Stage::Submission => "submission",
			Stage::Persistence => "persistence",
		};
		f.write_str(name)
	}
}

/// Error reported by a stage on the shared error channel.
///
/// Non-fatal errors are counted and logged. A fatal error stops the run.
#[derive(Debug, Clone, Error)]
#[error("{stage} error: {message}")]
pub struct PipelineError {
	pub stage: Stage,
	pub message: String,
	pub fatal: bool,
}

impl PipelineError {
	/// An error affecting a single item.
	pub fn local(stage: Stage, message: impl Into<String>) -> Self {
		Self {
			stage,
			message: message.into(),
			fatal: false,
		}
	}

	/// An error that stops the run.
	pub fn fatal(stage: Stage, message: impl Into<String>) -> Self {
		Self {
			stage,
			message: message.into(),
			fatal: true,
		}
	}
}
