use serde_json::Value;

use confgrid_core::ReleaseId;

use super::{Context, ReleaseText, Target};

pub fn publish(ctx: &Context, target: &Target, text: &ReleaseText) -> anyhow::Result<Value> {
    let release = ctx
        .service
        .publish(&target.key(), &text.request(&ctx.operator))?;
    Ok(serde_json::to_value(release)?)
}

/// Roll back `release_id`; with `to`, roll back every active release after
/// `to` as well.
pub fn rollback(ctx: &Context, release_id: ReleaseId, to: Option<ReleaseId>) -> anyhow::Result<Value> {
    let abandoned = match to {
        Some(to) => ctx.service.rollback_to(release_id, to, &ctx.operator)?,
        None => ctx.service.rollback(release_id, &ctx.operator)?,
    };
    Ok(serde_json::to_value(abandoned)?)
}
