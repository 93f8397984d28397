use serde_json::{Value, json};

use confgrid_core::Page;

use super::{Context, Target};

/// Items, lock, active release and branch of one namespace.
pub fn show(ctx: &Context, target: &Target) -> anyhow::Result<Value> {
    let key = target.key();
    let Some(namespace) = ctx.service.find_namespace(&key)? else {
        anyhow::bail!("namespace {key} not found");
    };

    let branch = match ctx.service.find_branch(&key)? {
        Some(branch) => {
            let rule = ctx.service.current_gray_rule(&key, &branch.cluster_name)?;
            let release = ctx.service.find_active_release(&branch.key())?;
            json!({
                "namespace": branch,
                "rule": rule,
                "active_release": release,
                "items": ctx.service.find_items(&branch.key())?,
            })
        }
        None => Value::Null,
    };

    Ok(json!({
        "namespace": namespace,
        "items": ctx.service.find_items(&key)?,
        "lock": ctx.service.find_lock(&key)?,
        "active_release": ctx.service.find_active_release(&key)?,
        "branch": branch,
    }))
}

pub fn history(ctx: &Context, target: &Target, page: usize, size: usize) -> anyhow::Result<Value> {
    let rows = ctx
        .service
        .find_history(&target.key(), Page::new(page, size))?;
    Ok(serde_json::to_value(rows)?)
}
