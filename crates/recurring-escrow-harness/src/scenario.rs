//! JSON scenario scripts
//!
//! A scenario is a list of steps run in order against a fresh [`TestEnv`].
//! Agreements are referred to by label and providers by index; amounts are
//! whole tokens.
//!
//! ```json
//! {
//!   "name": "thaw then withdraw",
//!   "steps": [
//!     { "action": "offer", "label": "a", "provider": 1 },
//!     { "action": "fund", "provider": 1, "tokens": 3700 },
//!     { "action": "accept", "label": "a" },
//!     { "action": "cancel_by_provider", "label": "a" },
//!     { "action": "remove", "label": "a" },
//!     { "action": "advance", "seconds": 86400 },
//!     { "action": "maintain", "provider": 1 },
//!     { "action": "check", "provider": 1, "balance": 0, "thawing": 0 }
//!   ]
//! }
//! ```

use std::collections::{BTreeSet, HashMap};

use recurring_escrow_core::ManagerSnapshot;
use recurring_escrow_types::{
    Address, AgreementId, AgreementTerms, AgreementUpdate, EscrowAccount, EscrowError, ManagerEvent,
    Tokens,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::env::{EscrowSimConfig, OfferShape, TestEnv, AGREEMENT_DURATION_SECS};

/// Scenario failures
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Step {step}: unknown agreement label '{label}'")]
    UnknownLabel { step: usize, label: String },

    #[error("Step {step}: no update offered for '{label}'")]
    NoPendingUpdate { step: usize, label: String },

    #[error("Step {step} ({action}) failed: {source}")]
    StepFailed {
        step: usize,
        action: String,
        #[source]
        source: EscrowError,
    },

    #[error("Step {step} ({action}) succeeded, expected {expected}")]
    ExpectedFailure {
        step: usize,
        action: String,
        expected: String,
    },

    #[error("Step {step} ({action}) failed with {actual}, expected {expected}")]
    WrongFailure {
        step: usize,
        action: String,
        expected: String,
        actual: String,
    },

    #[error("Step {step}: {field} is {actual}, expected {expected}")]
    CheckFailed {
        step: usize,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Environment error: {0}")]
    Env(#[from] EscrowError),
}

pub type ScenarioResult<T> = std::result::Result<T, ScenarioError>;

fn default_initial_tokens() -> u64 {
    OfferShape::STANDARD.initial_tokens
}

fn default_tokens_per_second() -> u64 {
    OfferShape::STANDARD.tokens_per_second
}

fn default_max_seconds() -> u64 {
    OfferShape::STANDARD.max_seconds_per_collection
}

fn default_duration() -> u64 {
    AGREEMENT_DURATION_SECS
}

/// Something a scenario step does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Offer {
        label: String,
        provider: u64,
        #[serde(default = "default_initial_tokens")]
        initial_tokens: u64,
        #[serde(default = "default_tokens_per_second")]
        tokens_per_second: u64,
        #[serde(default = "default_max_seconds")]
        max_seconds_per_collection: u64,
        #[serde(default = "default_duration")]
        duration_secs: u64,
    },
    OfferUpdate {
        label: String,
        nonce: u32,
        #[serde(default = "default_initial_tokens")]
        initial_tokens: u64,
        #[serde(default = "default_tokens_per_second")]
        tokens_per_second: u64,
        #[serde(default = "default_max_seconds")]
        max_seconds_per_collection: u64,
        #[serde(default = "default_duration")]
        duration_secs: u64,
    },
    Fund {
        provider: u64,
        tokens: u64,
    },
    Accept {
        label: String,
    },
    AcceptUpdate {
        label: String,
    },
    CancelByProvider {
        label: String,
    },
    CancelByPayer {
        label: String,
    },
    Collect {
        label: String,
        tokens: u64,
    },
    Advance {
        seconds: u64,
    },
    Reconcile {
        label: String,
    },
    ReconcileProvider {
        provider: u64,
    },
    Remove {
        label: String,
    },
    Revoke {
        label: String,
    },
    RevokeUpdate {
        label: String,
    },
    Maintain {
        provider: u64,
    },
    /// Assert on a provider's state; omitted fields are not checked
    Check {
        provider: u64,
        #[serde(default)]
        required_escrow: Option<u64>,
        #[serde(default)]
        balance: Option<u64>,
        #[serde(default)]
        thawing: Option<u64>,
        #[serde(default)]
        agreement_count: Option<usize>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::OfferUpdate { .. } => "offer_update",
            Self::Fund { .. } => "fund",
            Self::Accept { .. } => "accept",
            Self::AcceptUpdate { .. } => "accept_update",
            Self::CancelByProvider { .. } => "cancel_by_provider",
            Self::CancelByPayer { .. } => "cancel_by_payer",
            Self::Collect { .. } => "collect",
            Self::Advance { .. } => "advance",
            Self::Reconcile { .. } => "reconcile",
            Self::ReconcileProvider { .. } => "reconcile_provider",
            Self::Remove { .. } => "remove",
            Self::Revoke { .. } => "revoke",
            Self::RevokeUpdate { .. } => "revoke_update",
            Self::Maintain { .. } => "maintain",
            Self::Check { .. } => "check",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,

    /// Error code the step must fail with, e.g. `AGREEMENT_STILL_CLAIMABLE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sim: Option<EscrowSimConfig>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(json: &str) -> ScenarioResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Log entry of one executed step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: &'static str,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: Vec<ManagerEvent>,
}

/// Final state of one provider touched by a scenario
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub provider: Address,
    pub required_escrow: Tokens,
    pub agreement_count: usize,
    pub account: EscrowAccount,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub steps: Vec<StepRecord>,
    pub providers: Vec<ProviderSummary>,
    pub snapshot: ManagerSnapshot,
}

/// Runs scenario steps against one environment
pub struct ScenarioRunner {
    env: TestEnv,
    terms: HashMap<String, (AgreementId, AgreementTerms)>,
    updates: HashMap<String, AgreementUpdate>,
    providers: BTreeSet<Address>,
    records: Vec<StepRecord>,
}

impl ScenarioRunner {
    pub fn new(env: TestEnv) -> Self {
        Self {
            env,
            terms: HashMap::new(),
            updates: HashMap::new(),
            providers: BTreeSet::new(),
            records: Vec::new(),
        }
    }

    pub fn env(&self) -> &TestEnv {
        &self.env
    }

    /// Run every step, stopping at the first unexpected outcome
    pub fn run(mut self, scenario: &Scenario) -> ScenarioResult<ScenarioReport> {
        info!(name = %scenario.name, steps = scenario.steps.len(), "Running scenario");
        for (index, step) in scenario.steps.iter().enumerate() {
            self.run_step(index, step)?;
        }

        let mut providers = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            providers.push(ProviderSummary {
                provider: *provider,
                required_escrow: self.env.manager.required_escrow(provider),
                agreement_count: self.env.manager.provider_agreement_count(provider),
                account: self.env.account(provider)?,
            });
        }

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            steps: self.records,
            providers,
            snapshot: self.env.manager.snapshot(),
        })
    }

    pub fn run_step(&mut self, index: usize, step: &Step) -> ScenarioResult<()> {
        let action = step.action.name();
        let outcome = self.apply(index, &step.action);

        let error = match (outcome, &step.expect_error) {
            (Ok(()), None) => None,
            (Ok(()), Some(expected)) => {
                return Err(ScenarioError::ExpectedFailure {
                    step: index,
                    action: action.to_string(),
                    expected: expected.clone(),
                })
            }
            (Err(StepError::Escrow(err)), Some(expected)) if err.error_code() == expected.as_str() => {
                Some(err.to_string())
            }
            (Err(StepError::Escrow(err)), Some(expected)) => {
                return Err(ScenarioError::WrongFailure {
                    step: index,
                    action: action.to_string(),
                    expected: expected.clone(),
                    actual: err.error_code().to_string(),
                })
            }
            (Err(StepError::Escrow(err)), None) => {
                return Err(ScenarioError::StepFailed {
                    step: index,
                    action: action.to_string(),
                    source: err,
                })
            }
            (Err(StepError::Scenario(err)), _) => return Err(err),
        };

        debug!(step = index, action, failed = error.is_some(), "Scenario step");
        self.records.push(StepRecord {
            index,
            action,
            timestamp: self.env.now(),
            error,
            events: self.env.manager.take_events(),
        });
        Ok(())
    }

    fn apply(&mut self, index: usize, action: &Action) -> Result<(), StepError> {
        match action {
            Action::Offer {
                label,
                provider,
                initial_tokens,
                tokens_per_second,
                max_seconds_per_collection,
                duration_secs,
            } => {
                let shape = OfferShape {
                    initial_tokens: *initial_tokens,
                    tokens_per_second: *tokens_per_second,
                    max_seconds_per_collection: *max_seconds_per_collection,
                    duration_secs: *duration_secs,
                };
                let provider = self.provider(*provider);
                let terms = self.env.terms(provider, shape);
                let agreement_id = self.env.offer(terms.clone())?;
                self.terms.insert(label.clone(), (agreement_id, terms));
            }
            Action::OfferUpdate {
                label,
                nonce,
                initial_tokens,
                tokens_per_second,
                max_seconds_per_collection,
                duration_secs,
            } => {
                let agreement_id = self.agreement_id(index, label)?;
                let shape = OfferShape {
                    initial_tokens: *initial_tokens,
                    tokens_per_second: *tokens_per_second,
                    max_seconds_per_collection: *max_seconds_per_collection,
                    duration_secs: *duration_secs,
                };
                let update = self.env.update_terms(agreement_id, *nonce, shape);
                self.env.offer_update(update.clone())?;
                self.updates.insert(label.clone(), update);
            }
            Action::Fund { provider, tokens } => {
                let provider = self.provider(*provider);
                self.env.fund(&provider, *tokens)?;
            }
            Action::Accept { label } => {
                let terms = self.labeled(index, label)?.1.clone();
                self.env.accept(&terms)?;
            }
            Action::AcceptUpdate { label } => {
                let update = self
                    .updates
                    .get(label)
                    .cloned()
                    .ok_or_else(|| ScenarioError::NoPendingUpdate {
                        step: index,
                        label: label.clone(),
                    })?;
                self.env.accept_update(&update)?;
            }
            Action::CancelByProvider { label } => {
                let agreement_id = self.agreement_id(index, label)?;
                self.env.collector.cancel_by_provider(&agreement_id)?;
            }
            Action::CancelByPayer { label } => {
                let agreement_id = self.agreement_id(index, label)?;
                self.env.collector.cancel_by_payer(&agreement_id)?;
            }
            Action::Collect { label, tokens } => {
                let agreement_id = self.agreement_id(index, label)?;
                self.env
                    .collector
                    .collect(&agreement_id, Tokens::from_whole(*tokens))?;
            }
            Action::Advance { seconds } => {
                self.env.advance(*seconds);
            }
            Action::Reconcile { label } => {
                let agreement_id = self.agreement_id(index, label)?;
                self.env.manager.reconcile_agreement(&agreement_id)?;
            }
            Action::ReconcileProvider { provider } => {
                let provider = self.provider(*provider);
                self.env.manager.reconcile_provider(&provider)?;
            }
            Action::Remove { label } => {
                let agreement_id = self.agreement_id(index, label)?;
                self.env.manager.remove_agreement(&agreement_id)?;
            }
            Action::Revoke { label } => {
                let agreement_id = self.agreement_id(index, label)?;
                let operator = self.env.operator();
                self.env.manager.revoke_offer(&operator, &agreement_id)?;
            }
            Action::RevokeUpdate { label } => {
                let agreement_id = self.agreement_id(index, label)?;
                let operator = self.env.operator();
                self.env.manager.revoke_agreement_update(&operator, &agreement_id)?;
            }
            Action::Maintain { provider } => {
                let provider = self.provider(*provider);
                self.env.manager.maintain(&provider)?;
            }
            Action::Check {
                provider,
                required_escrow,
                balance,
                thawing,
                agreement_count,
            } => {
                let provider = self.provider(*provider);
                self.check(index, &provider, *required_escrow, *balance, *thawing, *agreement_count)?;
            }
        }
        Ok(())
    }

    fn check(
        &self,
        index: usize,
        provider: &Address,
        required_escrow: Option<u64>,
        balance: Option<u64>,
        thawing: Option<u64>,
        agreement_count: Option<usize>,
    ) -> Result<(), StepError> {
        let account = self.env.account(provider)?;
        let tokens = [
            ("required_escrow", required_escrow, self.env.manager.required_escrow(provider)),
            ("balance", balance, account.balance),
            ("thawing", thawing, account.tokens_thawing),
        ];
        for (field, expected, actual) in tokens {
            if let Some(expected) = expected.map(Tokens::from_whole) {
                if expected != actual {
                    return Err(ScenarioError::CheckFailed {
                        step: index,
                        field: field.to_string(),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    }
                    .into());
                }
            }
        }

        if let Some(expected) = agreement_count {
            let actual = self.env.manager.provider_agreement_count(provider);
            if expected != actual {
                return Err(ScenarioError::CheckFailed {
                    step: index,
                    field: "agreement_count".to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn provider(&mut self, index: u64) -> Address {
        let provider = TestEnv::provider(index);
        self.providers.insert(provider);
        provider
    }

    fn labeled(&self, index: usize, label: &str) -> Result<&(AgreementId, AgreementTerms), ScenarioError> {
        self.terms.get(label).ok_or_else(|| ScenarioError::UnknownLabel {
            step: index,
            label: label.to_string(),
        })
    }

    fn agreement_id(&self, index: usize, label: &str) -> Result<AgreementId, ScenarioError> {
        self.labeled(index, label).map(|(id, _)| *id)
    }
}

/// Manager errors can be expected by a step; harness errors never can
enum StepError {
    Escrow(EscrowError),
    Scenario(ScenarioError),
}

impl From<EscrowError> for StepError {
    fn from(err: EscrowError) -> Self {
        Self::Escrow(err)
    }
}

impl From<ScenarioError> for StepError {
    fn from(err: ScenarioError) -> Self {
        Self::Scenario(err)
    }
}

/// Parse and run a scenario on a fresh environment
pub fn run_scenario(scenario: &Scenario) -> ScenarioResult<ScenarioReport> {
    let sim = scenario.sim.unwrap_or_default();
    let env = TestEnv::with_config(recurring_escrow_core::ManagerConfig::development(), sim)?;
    ScenarioRunner::new(env).run(scenario)
}
