use serde_json::Value;

use confgrid_core::{Item, ItemChangeSet, ItemDraft};

use super::{Context, ReleaseText, Target};

pub fn publish(
    ctx: &Context,
    target: &Target,
    branch: &str,
    text: &ReleaseText,
    exclude: &[String],
) -> anyhow::Result<Value> {
    let excluded = (!exclude.is_empty()).then_some(exclude);
    let release = ctx.service.publish_gray(
        &target.key(),
        branch,
        &text.request(&ctx.operator),
        excluded,
    )?;
    Ok(serde_json::to_value(release)?)
}

/// Merge every branch override into the master's items and release them.
pub fn merge(
    ctx: &Context,
    target: &Target,
    branch: &str,
    text: &ReleaseText,
    delete_branch: bool,
) -> anyhow::Result<Value> {
    let master = target.key();
    let Some(branch_ns) = ctx
        .service
        .find_branch(&master)?
        .filter(|ns| ns.cluster_name == branch)
    else {
        anyhow::bail!("{master} has no branch {branch}");
    };

    let change_set = merge_change_set(
        &ctx.service.find_items(&master)?,
        &ctx.service.find_items(&branch_ns.key())?,
    );
    let release = ctx.service.merge_branch_to_master(
        &master,
        branch,
        &change_set,
        &text.request(&ctx.operator),
        delete_branch,
    )?;
    Ok(serde_json::to_value(release)?)
}

/// Branch items the master lacks become creates; those with a different
/// value become updates.
fn merge_change_set(master: &[Item], branch: &[Item]) -> ItemChangeSet {
    let mut change_set = ItemChangeSet::default();
    for item in branch {
        let draft = ItemDraft {
            comment: Some(item.comment.clone()),
            ..ItemDraft::new(&item.key, &item.value)
        };
        match master.iter().find(|m| m.key == item.key) {
            None => change_set.create_items.push(draft),
            Some(existing) if existing.value != item.value => change_set.update_items.push(draft),
            Some(_) => {}
        }
    }
    change_set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{item, release, target};

    #[test]
    fn gray_publish_and_merge() {
        let alice = Context::in_memory("alice");
        let bob = alice.as_operator("bob");
        let t = target("orderSvc");
        alice.service.create_namespace(&t.key(), "alice").unwrap();
        item::set(&alice, &t, "timeout", "30", None).unwrap();
        item::set(&alice, &t, "pool", "10", None).unwrap();
        release::publish(&bob, &t, &ReleaseText::default()).unwrap();

        let branch = alice.service.create_branch(&t.key(), "alice").unwrap();
        let branch_target = Target {
            cluster: branch.cluster_name.clone(),
            ..t.clone()
        };
        item::set(&alice, &branch_target, "timeout", "5", None).unwrap();
        item::set(&alice, &branch_target, "debug", "true", None).unwrap();

        let gray = publish(&bob, &t, &branch.cluster_name, &ReleaseText::default(), &["debug".to_string()]).unwrap();
        assert_eq!(gray["configuration"]["timeout"], "5");
        assert!(gray["configuration"].get("debug").is_none());

        let merged = merge(&bob, &t, &branch.cluster_name, &ReleaseText::default(), true).unwrap();
        assert_eq!(merged["configuration"]["timeout"], "5");
        assert_eq!(merged["configuration"]["debug"], "true");
        assert_eq!(merged["configuration"]["pool"], "10");
        assert!(bob.service.find_branch(&t.key()).unwrap().is_none());

        assert!(merge(&bob, &t, &branch.cluster_name, &ReleaseText::default(), true).is_err());
    }
}
