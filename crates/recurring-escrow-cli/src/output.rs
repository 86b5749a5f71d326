//! Human-readable scenario output

use colored::Colorize;
use recurring_escrow_harness::ScenarioReport;
use recurring_escrow_types::ManagerEvent;

pub fn print_report(report: &ScenarioReport) {
    println!();
    let title = if report.name.is_empty() {
        "Scenario".to_string()
    } else {
        format!("Scenario: {}", report.name)
    };
    println!("{}", title.bright_white().bold());
    println!("{}", "─".repeat(60));

    for step in &report.steps {
        let marker = if step.error.is_some() {
            "✗".yellow()
        } else {
            "●".bright_green()
        };
        println!(
            "  {} {:>3}  {:<20} {}",
            marker,
            step.index,
            step.action,
            format!("t={}", step.timestamp).bright_black()
        );
        if let Some(error) = &step.error {
            println!("          {} {}", "expected failure:".yellow(), error);
        }
        for event in &step.events {
            println!("          {}", describe(event).bright_black());
        }
    }

    println!();
    println!("{}", "Providers".bright_white().bold());
    println!("{}", "─".repeat(60));
    if report.providers.is_empty() {
        println!("  {}", "No providers touched".yellow());
    }
    for summary in &report.providers {
        println!("  {}", summary.provider.to_string().bright_cyan());
        println!("    Required escrow:  {}", summary.required_escrow);
        println!("    Balance:          {}", summary.account.balance);
        println!("    Thawing:          {}", summary.account.tokens_thawing);
        if summary.account.is_thawing() {
            println!("    Thaw ends at:     {}", summary.account.thaw_end_timestamp);
        }
        println!("    Agreements:       {}", summary.agreement_count);
    }
    println!();
}

fn describe(event: &ManagerEvent) -> String {
    match event {
        ManagerEvent::AgreementOffered {
            agreement_id,
            max_next_claim,
            ..
        } => format!("offered {} reserving {}", agreement_id, max_next_claim),
        ManagerEvent::AgreementUpdateOffered {
            agreement_id,
            nonce,
            pending_max_next_claim,
            ..
        } => format!(
            "update #{} offered for {} reserving {}",
            nonce, agreement_id, pending_max_next_claim
        ),
        ManagerEvent::OfferRevoked { agreement_id, .. } => format!("offer {} revoked", agreement_id),
        ManagerEvent::AgreementUpdateRevoked { agreement_id, nonce, .. } => {
            format!("update #{} for {} revoked", nonce, agreement_id)
        }
        ManagerEvent::AgreementReconciled {
            agreement_id,
            old_max_next_claim,
            new_max_next_claim,
            pending_cleared,
            ..
        } => {
            let mut line = format!(
                "reconciled {}: {} -> {}",
                agreement_id, old_max_next_claim, new_max_next_claim
            );
            if *pending_cleared {
                line.push_str(" (pending update cleared)");
            }
            line
        }
        ManagerEvent::AgreementRemoved { agreement_id, .. } => format!("removed {}", agreement_id),
        ManagerEvent::EscrowThawed {
            tokens,
            thaw_end_timestamp,
            ..
        } => format!("thawing {} until t={}", tokens, thaw_end_timestamp),
        ManagerEvent::EscrowThawReduced { from, to, .. } => format!("thaw reduced {} -> {}", from, to),
        ManagerEvent::EscrowWithdrawn { tokens, .. } => format!("withdrew {}", tokens),
        ManagerEvent::OperatorGranted { account } => format!("operator granted to {}", account),
        ManagerEvent::OperatorRevoked { account } => format!("operator revoked from {}", account),
    }
}
