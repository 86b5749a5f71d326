//! Built-in demo scenarios

use clap::ValueEnum;
use recurring_escrow_harness::{Scenario, ScenarioResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// Cancel, remove, wait out the thaw, withdraw
    ThawWithdraw,
    /// A new offer during a thaw shrinks it without restarting the timer
    PartialCancel,
    /// Work on one provider leaves another untouched
    MultiProvider,
    /// Both terms are reserved until an update is accepted
    UpdateLifecycle,
}

impl Demo {
    fn script(self) -> &'static str {
        match self {
            Demo::ThawWithdraw => include_str!("../../../scenarios/thaw_withdraw.json"),
            Demo::PartialCancel => include_str!("../../../scenarios/partial_cancel.json"),
            Demo::MultiProvider => include_str!("../../../scenarios/multi_provider.json"),
            Demo::UpdateLifecycle => include_str!("../../../scenarios/update_lifecycle.json"),
        }
    }

    pub fn scenario(self) -> ScenarioResult<Scenario> {
        Scenario::from_json(self.script())
    }
}
