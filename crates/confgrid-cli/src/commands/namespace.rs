use serde_json::Value;

use super::{Context, Target};

pub fn create(ctx: &Context, target: &Target) -> anyhow::Result<Value> {
    let namespace = ctx.service.create_namespace(&target.key(), &ctx.operator)?;
    Ok(serde_json::to_value(namespace)?)
}
