use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use site_gate::{check_domain, check_navigation_pattern, PatternMatch};

use crate::cli::context::CliContext;
use crate::cli::output::emit;

#[derive(Args, Clone, Debug)]
pub struct GateArgs {
    /// Frame address to evaluate
    pub url: String,

    /// Allow-listed domain to test against instead of the configured one
    #[arg(long)]
    pub domain: Option<String>,

    /// Exit with an error when the domain check denies the address
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Serialize)]
struct GateReport {
    url: String,
    domain: Option<String>,
    domain_allowed: bool,
    domain_reason: Option<String>,
    booking_page: bool,
    booking_page_reason: Option<String>,
}

pub async fn cmd_gate(args: GateArgs, ctx: &CliContext) -> Result<()> {
    let domain = match args.domain.clone() {
        Some(domain) => Some(domain),
        None => match ctx.config().allow_listed_domain.clone() {
            Some(domain) => Some(domain),
            None => ctx.store()?.allow_listed_domain()?,
        },
    };

    let domain_result = check_domain(&args.url, domain.as_deref()).into_result();
    let pattern = check_navigation_pattern(&args.url, domain.as_deref());
    let report = GateReport {
        url: args.url.clone(),
        domain: domain.clone(),
        domain_allowed: domain_result.is_ok(),
        domain_reason: domain_result.as_ref().err().map(ToString::to_string),
        booking_page: pattern.is_match(),
        booking_page_reason: match &pattern {
            PatternMatch::Matches => None,
            PatternMatch::NoMatch(err) => Some(err.to_string()),
        },
    };

    emit(ctx.output(), &report, || {
        let verdict = |ok: bool, reason: &Option<String>| match (ok, reason) {
            (true, _) => "allowed".to_string(),
            (false, Some(reason)) => format!("denied ({reason})"),
            (false, None) => "denied".to_string(),
        };
        format!(
            "url:          {}\ndomain:       {}\ndomain check: {}\nbooking page: {}",
            report.url,
            report.domain.as_deref().unwrap_or("<unset>"),
            verdict(report.domain_allowed, &report.domain_reason),
            verdict(report.booking_page, &report.booking_page_reason),
        )
    })?;

    if args.strict && !report.domain_allowed {
        bail!("{} is not allowed", args.url);
    }
    Ok(())
}
