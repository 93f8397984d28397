use serde_json::{Value, json};

use confgrid_core::{ALL_IP, BranchStatus, GrayRuleItem};

use super::{Context, Target};

pub fn create(ctx: &Context, target: &Target) -> anyhow::Result<Value> {
    let branch = ctx.service.create_branch(&target.key(), &ctx.operator)?;
    Ok(serde_json::to_value(branch)?)
}

pub fn delete(ctx: &Context, target: &Target, branch: &str) -> anyhow::Result<Value> {
    let deleted = ctx.service.delete_branch(
        &target.key(),
        branch,
        BranchStatus::Deleted,
        &ctx.operator,
    )?;
    Ok(json!({ "branch": branch, "deleted": deleted }))
}

pub fn rules(ctx: &Context, target: &Target, branch: &str, rules: &[String]) -> anyhow::Result<Value> {
    let rules = rules
        .iter()
        .map(|rule| parse_rule(rule))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let rule = ctx
        .service
        .update_branch_rules(&target.key(), branch, rules, &ctx.operator)?;
    Ok(serde_json::to_value(rule)?)
}

/// `app=ip1,ip2`, or a bare `app` for every instance of it.
fn parse_rule(rule: &str) -> anyhow::Result<GrayRuleItem> {
    let (app, ips) = match rule.split_once('=') {
        Some((app, ips)) => (app.trim(), ips),
        None => (rule.trim(), ALL_IP),
    };
    if app.is_empty() {
        anyhow::bail!("rule {rule:?} has no client app id");
    }
    let ips: Vec<&str> = ips
        .split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .collect();
    if ips.is_empty() {
        anyhow::bail!("rule {rule:?} lists no IPs");
    }
    Ok(GrayRuleItem::new(app, ips))
}
