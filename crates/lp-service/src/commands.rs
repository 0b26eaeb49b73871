//! Subcommand execution.

use crate::Command;
use lp_core::{ClientError, ProtocolClient};
use lp_types::{Address, U256};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Balance {
	address: Address,
	token_balance: U256,
	transcoder_stake: U256,
	delegator_stake: U256,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

pub async fn run(command: Command, client: &ProtocolClient) -> Result<(), Box<dyn std::error::Error>> {
	let lifecycle = client.lifecycle();

	let receipt = match command {
		Command::RoundInfo => return print_json(&lifecycle.round_info().await?),
		Command::Params => return print_json(&client.params().time_params().await?),
		Command::Balance => {
			let balance = Balance {
				address: client.address(),
				token_balance: lifecycle.token_balance().await?,
				transcoder_stake: lifecycle.transcoder_stake().await?,
				delegator_stake: lifecycle.delegator_stake().await?,
			};
			return print_json(&balance);
		},
		Command::WatchJobs => return watch_jobs(client).await,
		Command::InitializeRound => lifecycle.initialize_round().await?,
		Command::Reward => lifecycle.reward().await?,
		Command::Register {
			block_reward_cut,
			fee_share,
			price_per_segment,
		} => {
			lifecycle
				.transcoder(block_reward_cut, fee_share, price_per_segment)
				.await?
		},
		Command::Bond { amount, to } => {
			lifecycle
				.bond(amount, to.unwrap_or_else(|| client.address()))
				.await?
		},
		Command::Deposit { amount } => lifecycle.deposit(amount).await?,
		Command::Transfer { to, amount } => lifecycle.transfer(to, amount).await?,
		Command::CreateJob {
			stream_id,
			transcoding_options,
			max_price,
		} => lifecycle.job(stream_id, transcoding_options, max_price).await?,
		Command::DistributeFees { job_id, claim_id } => {
			lifecycle.distribute_fees(job_id, claim_id).await?
		},
	};

	print_json(&receipt)
}

/// Prints every job announced to the account until ctrl-c.
///
/// One subscription stays open for the whole run; it is replaced only if the
/// node closes it.
async fn watch_jobs(client: &ProtocolClient) -> Result<(), Box<dyn std::error::Error>> {
	let lifecycle = client.lifecycle();
	tracing::info!(transcoder = %client.address(), "Watching for new jobs");

	let mut subscription = lifecycle.subscribe_to_new_jobs().await?;
	loop {
		tokio::select! {
			outcome = lifecycle.next_new_job(&mut subscription) => match outcome {
				Ok(job) => print_json(&job)?,
				Err(ClientError::EventTimeout(_)) => {
					tracing::debug!("No new job yet");
				},
				Err(ClientError::Subscription(e)) => {
					tracing::warn!(error = %e, "Job subscription closed, re-subscribing");
					subscription = lifecycle.subscribe_to_new_jobs().await?;
				},
				Err(e) => return Err(e.into()),
			},
			_ = tokio::signal::ctrl_c() => {
				subscription.unsubscribe();
				tracing::info!("Stopped watching");
				return Ok(());
			},
		}
	}
}
