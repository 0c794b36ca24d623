//! Main entry point for the transaction spammer.
//!
//! `spammer run` loads a configuration, builds the engine with the
//! configured implementations and runs it until every workload is done or
//! the process is interrupted. The first Ctrl-C stops generation and drains
//! queued transactions; a second one stops submission immediately.
//!
//! The remaining subcommands are key utilities.

use alloy_primitives::Address;
use clap::{Parser, Subcommand};
use spammer_config::Config;
use std::path::PathBuf;

mod factory_registry;
mod keys;

/// Command-line arguments for the spammer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	#[command(subcommand)]
	command: Option<Command>,

	/// Path to configuration file, runs the spammer when no subcommand is given
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info", global = true)]
	log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the configured workloads
	Run {
		/// Path to configuration file
		#[arg(short, long, default_value = "config.toml")]
		config: PathBuf,
	},
	/// Print the address of a private key
	DeriveAddress {
		#[arg(long, conflicts_with = "key_file")]
		key: Option<String>,
		#[arg(long)]
		key_file: Option<PathBuf>,
	},
	/// Print the address of the contract a sender creates at a nonce
	DeriveContract {
		#[arg(long, conflicts_with_all = ["key", "key_file"])]
		sender: Option<Address>,
		#[arg(long, conflicts_with = "key_file")]
		key: Option<String>,
		#[arg(long)]
		key_file: Option<PathBuf>,
		#[arg(long)]
		nonce: u64,
	},
	/// Write fresh private keys into a directory
	KeyGen {
		#[arg(long, default_value_t = 1)]
		count: usize,
		#[arg(long, default_value = "keys")]
		dir: PathBuf,
	},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let command = match (args.command, args.config) {
		(Some(command), _) => command,
		(None, Some(config)) => Command::Run { config },
		(None, None) => return Err("no command given, try --help".into()),
	};

	match command {
		Command::Run { config } => run(config).await,
		Command::DeriveAddress { key, key_file } => {
			let account = keys::load_key(key, key_file).await?;
			println!("{:#x}", account.address());
			Ok(())
		},
		Command::DeriveContract {
			sender,
			key,
			key_file,
			nonce,
		} => {
			let sender = match sender {
				Some(sender) => sender,
				None => keys::load_key(key, key_file).await?.address(),
			};
			println!("{:#x}", keys::derive_contract(sender, nonce));
			Ok(())
		},
		Command::KeyGen { count, dir } => {
			for (address, path) in keys::generate_keys(&dir, count).await? {
				println!("{:#x} {}", address, path.display());
			}
			Ok(())
		},
	}
}

/// Loads the configuration, builds the engine and runs it.
async fn run(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
	tracing::info!("Started spammer");

	let path = config_path
		.to_str()
		.ok_or_else(|| format!("Invalid config path: {}", config_path.display()))?;
	let config = Config::from_file(path).await?;
	tracing::info!("Loaded configuration [{}]", config.spammer.id);

	let engine = factory_registry::build_spammer_from_config(config).await?;

	let run = engine.run();
	tokio::pin!(run);
	let mut interrupts = 0u32;
	let result = loop {
		tokio::select! {
			result = &mut run => break result,
			signal = tokio::signal::ctrl_c() => {
				if let Err(e) = signal {
					tracing::error!(error = %e, "Failed to listen for Ctrl-C");
					continue;
				}
				interrupts += 1;
				if interrupts == 1 {
					tracing::info!("Interrupted, draining queued transactions (Ctrl-C again to stop now)");
					engine.request_shutdown();
				} else {
					engine.halt();
				}
			}
		}
	};

	let report = result?;
	println!("state:              {}", report.final_state);
	println!("contracts deployed: {}", report.deployed.len());
	for contract in &report.deployed {
		println!("  {:#x}", contract);
	}
	println!("generated:          {}", report.generated);
	println!("submitted:          {}", report.submitted);
	println!("confirmed (sample): {}", report.confirmed);
	println!("generation errors:  {}", report.generation_errors);
	println!("submission errors:  {}", report.submission_errors);
	println!("persistence errors: {}", report.persistence_errors);

	tracing::info!("Stopped spammer");
	Ok(())
}
