use serde_json::Value;

use confgrid_core::{ItemChangeSet, ItemDraft};

use super::{Context, Target};

/// Create `key` or update it if the namespace already has it.
pub fn set(
    ctx: &Context,
    target: &Target,
    key: &str,
    value: &str,
    comment: Option<String>,
) -> anyhow::Result<Value> {
    let namespace = target.key();
    let exists = ctx
        .service
        .find_items(&namespace)?
        .iter()
        .any(|item| item.key == key);

    let draft = ItemDraft {
        comment,
        ..ItemDraft::new(key, value)
    };
    let mut change_set = ItemChangeSet::default();
    if exists {
        change_set.update_items.push(draft);
    } else {
        change_set.create_items.push(draft);
    }

    let items = ctx
        .service
        .apply_change_set(&namespace, &change_set, &ctx.operator)?;
    Ok(serde_json::to_value(items)?)
}

pub fn delete(ctx: &Context, target: &Target, key: &str) -> anyhow::Result<Value> {
    let items = ctx.service.apply_change_set(
        &target.key(),
        &ItemChangeSet::default().delete(key),
        &ctx.operator,
    )?;
    Ok(serde_json::to_value(items)?)
}
