//! # Multi-step transaction orchestration
//!
//! A [`TxPlanState`] is an ordered list of steps: submissions ([`StepKind::Approve`],
//! [`StepKind::Execute`]) and confirmation waits on an earlier submission
//! ([`StepKind::WaitForConfirmation`]). [`TxOrchestrator::run`] drives the plan strictly in
//! order and records everything it learns (gas estimate, nonce, hash, receipt) back into the
//! plan, so that a failed run can be resumed by calling `run` again with the same plan.
//!
//! ## Nonces
//! The plan owns its nonce override. Each successful submission consumes the current value
//! and advances it by one; waits consume nothing. A failed submission leaves the override
//! untouched so the next attempt reuses the same nonce.
//!
//! ## Resumption
//! A submission step that already carries a hash is never submitted again. A run that stops
//! on a confirmation timeout leaves `completed_steps` at the wait, so rerunning waits again.
//! Callers that verified the transaction out of band can skip the wait with
//! [`TxPlanState::resume_from`].

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;
use async_trait::async_trait;
use log::{info, warn};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::collaborators::{
    CallError,
    ConfirmationWatcher,
    ContractCall,
    GasEstimate,
    GasEstimator,
    TxParams,
    TxReceipt,
    TxSubmitter,
};

/// One step of a plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepKind {
    /// Token approval that a later step depends on.
    Approve(ContractCall),
    /// Block until the transaction of step `of_step` is mined.
    WaitForConfirmation {
        /// Index of the submission step to wait for.
        of_step: usize,
    },
    /// The main action.
    Execute(ContractCall),
}

impl StepKind {
    /// Short name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Approve(_) => "approve",
            StepKind::WaitForConfirmation { .. } => "wait_for_confirmation",
            StepKind::Execute(_) => "execute",
        }
    }

    /// The call a submission step sends, `None` for waits.
    pub fn call(&self) -> Option<&ContractCall> {
        match self {
            StepKind::Approve(call) | StepKind::Execute(call) => Some(call),
            StepKind::WaitForConfirmation { .. } => None,
        }
    }
}

/// A step together with what running it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxStep {
    /// What the step does.
    pub kind: StepKind,
    /// Latest gas estimate of a submission step.
    pub gas_estimate: Option<GasEstimate>,
    /// Hash of the submitted transaction. Once set the step is never submitted again.
    pub submitted_hash: Option<TxHash>,
    /// Nonce override the transaction was submitted with.
    pub nonce_used: Option<u64>,
    /// Receipt observed by a wait step.
    pub receipt: Option<TxReceipt>,
}

impl TxStep {
    fn new(kind: StepKind) -> Self {
        Self {
            kind,
            gas_estimate: None,
            submitted_hash: None,
            nonce_used: None,
            receipt: None,
        }
    }

    /// Whether this step submits a transaction.
    pub fn is_submission(&self) -> bool {
        self.kind.call().is_some()
    }
}

/// A plan could not be built or repositioned.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PlanError {
    /// The plan contains no submission step.
    #[snafu(display("plan '{name}' submits no transaction"))]
    NothingToSubmit {
        /// Plan name.
        name: String,
    },

    /// A wait step does not point at an earlier submission step.
    #[snafu(display("step {index} waits for step {target}, which is not an earlier submission"))]
    InvalidWaitTarget {
        /// Index of the wait step.
        index: usize,
        /// Index it points at.
        target: usize,
    },

    /// The resume index is past the end of the plan.
    #[snafu(display("cannot resume at step {index} of a {len}-step plan"))]
    ResumeOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of steps.
        len: usize,
    },

    /// Resuming would skip a submission that has not produced a transaction.
    #[snafu(display("cannot resume at step {index}: step {unsubmitted} was never submitted"))]
    ResumeSkipsUnsubmitted {
        /// Requested index.
        index: usize,
        /// First skipped submission without a hash.
        unsubmitted: usize,
    },
}

/// Progress of one multi-step operation.
///
/// Owned by a single caller for the lifetime of the operation and never shared.
#[derive(Clone, Debug)]
pub struct TxPlanState {
    /// Plan name for logs and prompts.
    name: String,
    /// Steps in execution order.
    steps: Vec<TxStep>,
    /// Number of leading steps that finished.
    completed_steps: usize,
    /// Nonce for the next submission, if the caller supplied one.
    nonce_override: Option<u64>,
    /// Hash of the most recent submission.
    last_tx_hash: Option<TxHash>,
}

impl TxPlanState {
    /// Validates `kinds` and creates a fresh plan.
    pub fn new(
        name: impl Into<String>,
        kinds: Vec<StepKind>,
        nonce_override: Option<u64>,
    ) -> Result<Self, PlanError> {
        let name = name.into();
        for (index, kind) in kinds.iter().enumerate() {
            if let StepKind::WaitForConfirmation { of_step } = kind {
                let target = *of_step;
                let valid = target < index && kinds[target].call().is_some();
                snafu::ensure!(valid, InvalidWaitTargetSnafu { index, target });
            }
        }
        snafu::ensure!(
            kinds.iter().any(|kind| kind.call().is_some()),
            NothingToSubmitSnafu { name }
        );

        Ok(Self {
            name,
            steps: kinds.into_iter().map(TxStep::new).collect(),
            completed_steps: 0,
            nonce_override,
            last_tx_hash: None,
        })
    }

    /// Plan name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps and what they produced so far.
    pub fn steps(&self) -> &[TxStep] {
        &self.steps
    }

    /// Number of leading steps that finished.
    pub fn completed_steps(&self) -> usize {
        self.completed_steps
    }

    /// Whether every step finished.
    pub fn is_complete(&self) -> bool {
        self.completed_steps == self.steps.len()
    }

    /// Nonce the next submission will use.
    pub fn nonce_override(&self) -> Option<u64> {
        self.nonce_override
    }

    /// Hash of the most recent submission.
    pub fn last_tx_hash(&self) -> Option<TxHash> {
        self.last_tx_hash
    }

    /// Moves the cursor to step `index`.
    ///
    /// Every submission step before `index` must already carry a hash.
    pub fn resume_from(&mut self, index: usize) -> Result<(), PlanError> {
        let len = self.steps.len();
        snafu::ensure!(index <= len, ResumeOutOfRangeSnafu { index, len });
        if let Some(unsubmitted) = self.steps[..index]
            .iter()
            .position(|step| step.is_submission() && step.submitted_hash.is_none())
        {
            return ResumeSkipsUnsubmittedSnafu { index, unsubmitted }.fail();
        }
        self.completed_steps = index;
        Ok(())
    }

    /// Submission steps from the cursor on that have no hash yet.
    fn pending_submissions(&self) -> usize {
        self.steps[self.completed_steps..]
            .iter()
            .filter(|step| step.is_submission() && step.submitted_hash.is_none())
            .count()
    }
}

/// Why a step failed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StepFailureCause {
    /// Gas estimation failed.
    #[snafu(display("gas estimation failed: {source}"))]
    Estimate {
        /// The collaborator error.
        source: CallError,
    },

    /// Signing or broadcasting failed.
    #[snafu(display("submission failed: {source}"))]
    Submit {
        /// The collaborator error.
        source: CallError,
    },

    /// Watching for the receipt failed.
    #[snafu(display("receipt lookup failed: {source}"))]
    Watch {
        /// The collaborator error.
        source: CallError,
    },

    /// The transaction was mined but reverted.
    #[snafu(display("transaction {hash} reverted"))]
    Reverted {
        /// The reverted transaction.
        hash: TxHash,
    },

    /// The nonce override is `u64::MAX`, which no account can reach (EIP-2681).
    #[snafu(display("nonce {nonce} is past the largest usable account nonce"))]
    NonceExhausted {
        /// The rejected nonce.
        nonce: u64,
    },

    /// The step being waited for has no transaction.
    #[snafu(display("step {target} has no submitted transaction to wait for"))]
    MissingTarget {
        /// Index of the referenced step.
        target: usize,
    },
}

/// A run stopped before completing the plan.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OrchestratorError {
    /// A step failed. The plan is left resumable at that step.
    #[snafu(display("step {index} ({step}) failed: {source}"))]
    StepFailure {
        /// Index of the failed step.
        index: usize,
        /// Name of the failed step.
        step: &'static str,
        /// What went wrong.
        source: StepFailureCause,
    },

    /// A transaction was submitted but not seen mined in time. Its outcome is unknown.
    #[snafu(display(
        "transaction {hash} awaited by step {index} not mined after {waited:?}; it may still confirm"
    ))]
    ConfirmationTimeout {
        /// Index of the wait step.
        index: usize,
        /// The pending transaction.
        hash: TxHash,
        /// How long the orchestrator waited.
        waited: Duration,
    },

    /// Every step finished without any transaction being recorded.
    #[snafu(display("plan '{name}' finished without submitting a transaction"))]
    NothingSubmitted {
        /// Plan name.
        name: String,
    },
}

impl OrchestratorError {
    /// Index of the step the run stopped at.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            OrchestratorError::StepFailure { index, .. }
            | OrchestratorError::ConfirmationTimeout { index, .. } => Some(*index),
            OrchestratorError::NothingSubmitted { .. } => None,
        }
    }

    /// Whether the outcome is unknown rather than failed.
    pub fn is_pending(&self) -> bool {
        matches!(self, OrchestratorError::ConfirmationTimeout { .. })
    }
}

/// Result alias for orchestrator runs.
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

/// Asks the operator to confirm a submission.
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    /// Returns whether the operator accepts submitting `call` with `gas`.
    async fn confirm(
        &self,
        plan: &str,
        index: usize,
        call: &ContractCall,
        gas: &GasEstimate,
    ) -> bool;
}

/// How submissions are confirmed.
#[derive(Clone, Copy)]
pub enum Approval<'a> {
    /// Submit without asking.
    PreApproved,
    /// Ask before every submission.
    Interactive(&'a dyn ConfirmPrompt),
}

/// How a run ended when no error occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Every step finished.
    Completed {
        /// Hash of the last submitted transaction.
        final_tx_hash: TxHash,
    },
    /// The operator declined the submission at `index`; nothing was sent for it.
    Declined {
        /// Index of the declined step.
        index: usize,
    },
}

/// Static orchestrator settings.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Longest wait for one transaction to be mined.
    pub confirmation_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(300),
        }
    }
}

/// Runs [`TxPlanState`]s against the wallet collaborators.
#[derive(Clone)]
pub struct TxOrchestrator {
    /// Gas estimation.
    estimator: Arc<dyn GasEstimator>,
    /// Signing and broadcasting.
    submitter: Arc<dyn TxSubmitter>,
    /// Receipt polling.
    watcher: Arc<dyn ConfirmationWatcher>,
    /// Static settings.
    config: OrchestratorConfig,
}

impl TxOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        estimator: Arc<dyn GasEstimator>,
        submitter: Arc<dyn TxSubmitter>,
        watcher: Arc<dyn ConfirmationWatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            estimator,
            submitter,
            watcher,
            config,
        }
    }

    /// Runs `plan` from its first unfinished step to the end.
    pub async fn run(&self, plan: &mut TxPlanState, approval: Approval<'_>) -> Result<PlanOutcome> {
        if let Some(nonce) = plan.nonce_override {
            if plan.pending_submissions() > 1 {
                warn!(
                    "⚠️ Plan '{}' submits {} transactions starting at custom nonce {nonce}; \
                     do not submit anything else from this account until it finishes",
                    plan.name,
                    plan.pending_submissions()
                );
            }
        }

        while plan.completed_steps < plan.steps.len() {
            let index = plan.completed_steps;
            let step = &plan.steps[index];
            match &step.kind {
                StepKind::WaitForConfirmation { of_step } => {
                    let target = *of_step;
                    self.wait(plan, index, target).await?;
                }
                _ if step.submitted_hash.is_some() => {
                    info!(
                        "⏭️ Step {index} of '{}' already submitted as {:?}, not resubmitting",
                        plan.name, step.submitted_hash
                    );
                    plan.last_tx_hash = step.submitted_hash;
                }
                _ => {
                    if !self.submit(plan, index, approval).await? {
                        info!("🛑 Step {index} of '{}' declined", plan.name);
                        return Ok(PlanOutcome::Declined { index });
                    }
                }
            }
            plan.completed_steps += 1;
        }

        let final_tx_hash = plan.last_tx_hash.context(NothingSubmittedSnafu {
            name: plan.name.clone(),
        })?;
        info!("✅ Plan '{}' completed, final transaction {final_tx_hash}", plan.name);
        Ok(PlanOutcome::Completed { final_tx_hash })
    }

    /// Estimates, confirms and submits the call of step `index`.
    ///
    /// Returns `false` when the operator declined.
    async fn submit(
        &self,
        plan: &mut TxPlanState,
        index: usize,
        approval: Approval<'_>,
    ) -> Result<bool> {
        let step = &plan.steps[index];
        let name = step.kind.name();
        let Some(call) = step.kind.call().cloned() else {
            return Ok(true);
        };

        let nonce = plan.nonce_override;
        let next_nonce = match nonce {
            Some(n) => Some(
                n.checked_add(1)
                    .context(NonceExhaustedSnafu { nonce: n })
                    .context(StepFailureSnafu { index, step: name })?,
            ),
            None => None,
        };

        let estimate = self
            .estimator
            .estimate(&call)
            .await
            .context(EstimateSnafu)
            .context(StepFailureSnafu { index, step: name })?;
        plan.steps[index].gas_estimate = Some(estimate);

        if let Approval::Interactive(prompt) = approval {
            if !prompt.confirm(&plan.name, index, &call, &estimate).await {
                return Ok(false);
            }
        }

        let params = TxParams::from_estimate(&estimate, nonce);
        let hash = self
            .submitter
            .submit(&call, &params)
            .await
            .context(SubmitSnafu)
            .context(StepFailureSnafu { index, step: name })?;

        let step = &mut plan.steps[index];
        step.submitted_hash = Some(hash);
        step.nonce_used = nonce;
        plan.nonce_override = next_nonce;
        plan.last_tx_hash = Some(hash);
        info!(
            "📤 Submitted {} ({name}) as {hash} with gas limit {} and nonce {}",
            call.label,
            estimate.gas_limit,
            nonce.map_or_else(|| "auto".to_string(), |n| n.to_string())
        );
        Ok(true)
    }

    /// Waits for the transaction of step `target` on behalf of wait step `index`.
    async fn wait(&self, plan: &mut TxPlanState, index: usize, target: usize) -> Result<()> {
        let step = "wait_for_confirmation";
        let hash = plan.steps[target]
            .submitted_hash
            .context(MissingTargetSnafu { target })
            .context(StepFailureSnafu { index, step })?;

        info!("⏳ Waiting for {hash} to be mined");
        let waited = self.config.confirmation_timeout;
        let receipt = match tokio::time::timeout(waited, self.watcher.wait_mined(hash)).await {
            Ok(receipt) => receipt
                .context(WatchSnafu)
                .context(StepFailureSnafu { index, step })?,
            Err(_) => {
                warn!("⌛ {hash} not mined after {waited:?}; check it before resuming");
                return ConfirmationTimeoutSnafu {
                    index,
                    hash,
                    waited,
                }
                .fail();
            }
        };
        plan.steps[index].receipt = Some(receipt);

        if !receipt.success {
            return Err(OrchestratorError::StepFailure {
                index,
                step,
                source: StepFailureCause::Reverted { hash },
            });
        }
        info!("⛏️ {hash} mined in block {:?}", receipt.block_number);
        Ok(())
    }
}
