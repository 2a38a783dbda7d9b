//! Interactive confirmation before each submission.

use std::io::{BufRead, Write};

use alloy::primitives::utils::format_units;
use async_trait::async_trait;
use log::warn;
use stader_core::collaborators::{ContractCall, GasEstimate};
use stader_core::tx_orchestrator::ConfirmPrompt;

/// Asks on the terminal and reads the answer from stdin.
pub struct StdinPrompt;

/// Whether `answer` accepts the submission. Anything but yes declines.
fn accepts(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Question shown before submitting `call`.
fn question(plan: &str, index: usize, call: &ContractCall, gas: &GasEstimate) -> String {
    let max_fee = format_units(gas.max_fee_per_gas, "gwei").unwrap_or_else(|_| "?".to_string());
    format!(
        "[{plan} step {index}] Submit '{}' to {} with gas limit {} and max fee {max_fee} gwei? [y/N] ",
        call.label, call.to, gas.gas_limit
    )
}

#[async_trait]
impl ConfirmPrompt for StdinPrompt {
    async fn confirm(
        &self,
        plan: &str,
        index: usize,
        call: &ContractCall,
        gas: &GasEstimate,
    ) -> bool {
        let question = question(plan, index, call, gas);
        let answer = tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            write!(stdout, "{question}")?;
            stdout.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok::<_, std::io::Error>(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => accepts(&line),
            Ok(Err(e)) => {
                warn!("⚠️ Could not read confirmation, treating as declined: {e}");
                false
            }
            Err(e) => {
                warn!("⚠️ Confirmation prompt failed, treating as declined: {e}");
                false
            }
        }
    }
}
