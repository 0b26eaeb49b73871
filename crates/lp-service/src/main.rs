//! Command-line client for the protocol.
//!
//! Each subcommand connects with the configured account and node, runs one
//! protocol operation or read, and prints the outcome as JSON.

use clap::{Parser, Subcommand};
use lp_config::Config;
use lp_types::{Address, U256};
use std::path::PathBuf;

mod commands;
mod factory_registry;

/// Command-line arguments for the protocol client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

/// Protocol operations and reads.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
	/// Current round, its start block and the latest block
	RoundInfo,
	/// Protocol timing constants
	Params,
	/// Token balance and stakes of the configured account
	Balance,
	/// Initialize the current round
	InitializeRound,
	/// Claim the reward for the current round
	Reward,
	/// Register the account as a transcoder
	Register {
		/// Percentage of the block reward kept by the transcoder
		#[arg(long)]
		block_reward_cut: u8,
		/// Percentage of fees shared with delegators
		#[arg(long)]
		fee_share: u8,
		/// Price asked per transcoded segment, in token base units
		#[arg(long)]
		price_per_segment: U256,
	},
	/// Bond tokens to a transcoder (the account itself by default)
	Bond {
		/// Amount to bond, in token base units
		#[arg(long)]
		amount: U256,
		/// Transcoder to bond to
		#[arg(long)]
		to: Option<Address>,
	},
	/// Deposit tokens for paying jobs
	Deposit {
		/// Amount to deposit, in token base units
		#[arg(long)]
		amount: U256,
	},
	/// Transfer tokens to another address
	Transfer {
		/// Recipient address
		#[arg(long)]
		to: Address,
		/// Amount to transfer, in token base units
		#[arg(long)]
		amount: U256,
	},
	/// Create a transcoding job for a stream
	CreateJob {
		/// Stream identifier
		#[arg(long)]
		stream_id: String,
		/// Requested output profiles
		#[arg(long, default_value = "P240p30fps16x9")]
		transcoding_options: String,
		/// Highest price accepted per segment
		#[arg(long)]
		max_price: U256,
	},
	/// Pay out the fees of a verified claim
	DistributeFees {
		/// Job the claim belongs to
		#[arg(long)]
		job_id: U256,
		/// Claim within the job
		#[arg(long)]
		claim_id: U256,
	},
	/// Print jobs assigned to the account until interrupted
	WatchJobs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.with_writer(std::io::stderr)
		.init();

	let config = Config::from_file(&args.config).await?;
	tracing::info!(
		config = %args.config.display(),
		protocol = %config.protocol.protocol_address,
		"Loaded configuration"
	);

	let client = factory_registry::build_client_from_config(config).await?;
	commands::run(args.command, &client).await
}
