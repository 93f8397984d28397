//! End-to-end release flows against an in-memory store.
//!
//! Editors are "alice"; publishes are done by "bob" so the namespace lock
//! taken by the edit does not block them.

use std::sync::{Arc, Mutex};

use confgrid_core::*;
use confgrid_release::*;
use confgrid_state::StateStore;

fn service() -> ReleaseService {
    ReleaseService::new(StateStore::open_in_memory().unwrap(), Arc::new(NoopNotifier))
}

fn order_svc() -> NamespaceKey {
    NamespaceKey::new("orderSvc", "default", "application")
}

fn config(pairs: &[(&str, &str)]) -> ConfigMap {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

fn edit(svc: &ReleaseService, key: &NamespaceKey, change_set: ItemChangeSet) {
    svc.apply_change_set(key, &change_set, "alice").unwrap();
}

fn publish(svc: &ReleaseService, key: &NamespaceKey, title: &str) -> Release {
    svc.publish(key, &ReleaseRequest::new(title, "bob")).unwrap()
}

fn gray(svc: &ReleaseService, branch: &Namespace, title: &str) -> Release {
    svc.publish_gray(&order_svc(), &branch.cluster_name, &ReleaseRequest::new(title, "bob"), None)
        .unwrap()
}

fn history(svc: &ReleaseService) -> Vec<ReleaseHistory> {
    svc.find_history(&order_svc(), Page::first(100)).unwrap()
}

fn branch_active(svc: &ReleaseService, branch: &Namespace) -> Option<Release> {
    svc.find_active_release(&branch.key()).unwrap()
}

/// Master `{timeout:30, pool:10}` released as R1, plus a branch.
fn master_with_branch(svc: &ReleaseService) -> (Release, Namespace) {
    svc.create_namespace(&order_svc(), "alice").unwrap();
    edit(
        svc,
        &order_svc(),
        ItemChangeSet::default().create("timeout", "30").create("pool", "10"),
    );
    let r1 = publish(svc, &order_svc(), "r1");
    let branch = svc.create_branch(&order_svc(), "alice").unwrap();
    (r1, branch)
}

// ── Lock gate ──────────────────────────────────────────────────────

#[test]
fn lock_owner_cannot_publish_unless_emergency() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    edit(&svc, &order_svc(), ItemChangeSet::default().create("timeout", "30"));

    let err = svc
        .publish(&order_svc(), &ReleaseRequest::new("r1", "alice"))
        .unwrap_err();
    assert!(matches!(err, ReleaseError::BadRequest(_)));
    assert!(svc.find_active_release(&order_svc()).unwrap().is_none());

    svc.publish(&order_svc(), &ReleaseRequest::new("r1", "alice").emergency(true))
        .unwrap();

    edit(&svc, &order_svc(), ItemChangeSet::default().update("timeout", "45"));
    publish(&svc, &order_svc(), "r2");
    assert!(svc.find_lock(&order_svc()).unwrap().is_none());
}

#[test]
fn second_editor_is_refused_while_locked() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    edit(&svc, &order_svc(), ItemChangeSet::default().create("timeout", "30"));

    let err = svc
        .apply_change_set(&order_svc(), &ItemChangeSet::default().create("pool", "10"), "carol")
        .unwrap_err();
    assert!(matches!(err, ReleaseError::BadRequest(msg) if msg.contains("alice")));
}

// ── Releases ───────────────────────────────────────────────────────

#[test]
fn releases_never_change_after_creation() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    edit(&svc, &order_svc(), ItemChangeSet::default().create("timeout", "30"));
    let r1 = publish(&svc, &order_svc(), "r1");
    edit(&svc, &order_svc(), ItemChangeSet::default().update("timeout", "45"));
    let r2 = publish(&svc, &order_svc(), "r2");
    svc.rollback(r2.id, "bob").unwrap();

    let r1_now = svc.find_release(r1.id).unwrap().unwrap();
    assert_eq!(r1_now, r1);

    let r2_now = svc.find_release(r2.id).unwrap().unwrap();
    assert!(r2_now.abandoned);
    assert_eq!(r2_now.abandoned_by.as_deref(), Some("bob"));
    assert_eq!(r2_now.configuration, r2.configuration);
    assert_eq!(r2_now.release_key, r2.release_key);
}

#[test]
fn only_the_newest_unabandoned_release_is_active() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    let r1 = publish(&svc, &order_svc(), "r1");
    let r2 = publish(&svc, &order_svc(), "r2");
    let r3 = publish(&svc, &order_svc(), "r3");
    assert_eq!(svc.find_active_release(&order_svc()).unwrap().unwrap().id, r3.id);

    svc.rollback(r3.id, "bob").unwrap();
    assert_eq!(svc.find_active_release(&order_svc()).unwrap().unwrap().id, r2.id);

    let active: Vec<ReleaseId> = svc
        .find_active_releases(&order_svc(), Page::first(10))
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(active, vec![r2.id, r1.id]);

    let all = svc.find_all_releases(&order_svc(), Page::first(10)).unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn releases_are_found_by_key() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    let r1 = publish(&svc, &order_svc(), "r1");
    let r2 = publish(&svc, &order_svc(), "r2");

    let found = svc
        .find_releases_by_keys(&[r2.release_key.clone(), "missing".into(), r1.release_key.clone()])
        .unwrap();
    assert_eq!(found, vec![r2, r1]);
}

// ── Gray publish ───────────────────────────────────────────────────

#[test]
fn branch_items_win_over_parent() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    edit(&svc, &order_svc(), ItemChangeSet::default().create("a", "1").create("b", "2"));
    let master = publish(&svc, &order_svc(), "r1");
    let branch = svc.create_branch(&order_svc(), "alice").unwrap();
    edit(&svc, &branch.key(), ItemChangeSet::default().create("b", "3").create("c", "4"));

    let g1 = gray(&svc, &branch, "g1");
    assert_eq!(g1.configuration, config(&[("a", "1"), ("b", "3"), ("c", "4")]));
    assert_eq!(g1.namespace_id, branch.id);

    let excluded = vec!["b".to_string()];
    let g2 = svc
        .publish_gray(
            &order_svc(),
            &branch.cluster_name,
            &ReleaseRequest::new("g2", "bob"),
            Some(excluded.as_slice()),
        )
        .unwrap();
    assert_eq!(g2.configuration, config(&[("a", "1"), ("b", "2"), ("c", "4")]));

    let rows = svc
        .find_history_by_release(g2.id, &[ReleaseOperation::GrayRelease])
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.namespace_key(), order_svc());
    assert_eq!(row.branch_name, branch.cluster_name);
    assert_eq!(row.previous_release_id, g1.id);
    assert_eq!(row.context.base_release_id, Some(master.id));
    assert_eq!(row.context.branch_release_keys, Some(vec!["c".to_string()]));
}

#[test]
fn excluded_key_follows_master_on_cascade() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    edit(&svc, &order_svc(), ItemChangeSet::default().create("a", "1").create("b", "2"));
    publish(&svc, &order_svc(), "r1");
    let branch = svc.create_branch(&order_svc(), "alice").unwrap();
    edit(&svc, &branch.key(), ItemChangeSet::default().create("b", "3").create("c", "4"));

    let excluded = vec!["b".to_string()];
    let g1 = svc
        .publish_gray(
            &order_svc(),
            &branch.cluster_name,
            &ReleaseRequest::new("g1", "bob"),
            Some(excluded.as_slice()),
        )
        .unwrap();
    assert_eq!(g1.configuration, config(&[("a", "1"), ("b", "2"), ("c", "4")]));

    edit(&svc, &order_svc(), ItemChangeSet::default().update("b", "7"));
    let r2 = publish(&svc, &order_svc(), "r2");

    let cascaded = branch_active(&svc, &branch).unwrap();
    assert_ne!(cascaded.id, g1.id);
    assert_eq!(cascaded.configuration, config(&[("a", "1"), ("b", "7"), ("c", "4")]));

    let rows = svc
        .find_history_by_release(cascaded.id, &[ReleaseOperation::MasterNormalReleaseMergeToGray])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].previous_release_id, g1.id);
    assert_eq!(rows[0].context.base_release_id, Some(r2.id));
    assert_eq!(rows[0].context.branch_release_keys, Some(vec!["c".to_string()]));
}

#[test]
fn publishing_the_branch_key_is_a_gray_publish() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "5"));

    let release = publish(&svc, &branch.key(), "g1");
    assert_eq!(release.configuration, config(&[("timeout", "5"), ("pool", "10")]));
    let rows = svc
        .find_history_by_release(release.id, &[ReleaseOperation::GrayRelease])
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn gray_publish_rebinds_the_current_rule() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    let rules = vec![GrayRuleItem::new("checkout", ["10.0.0.1"])];
    let rule = svc
        .update_branch_rules(&order_svc(), &branch.cluster_name, rules.clone(), "alice")
        .unwrap();
    assert_eq!(rule.release_id, 0);
    assert!(rule.matches("Checkout", "10.0.0.1"));
    assert!(!rule.matches("checkout", "10.0.0.2"));

    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "5"));
    let g1 = gray(&svc, &branch, "g1");

    let current = svc
        .current_gray_rule(&order_svc(), &branch.cluster_name)
        .unwrap()
        .unwrap();
    assert_eq!(current.release_id, g1.id);
    assert_eq!(current.rules, rules);
    assert!(current.id > rule.id);

    let row = &svc
        .find_history_by_release(g1.id, &[ReleaseOperation::GrayRelease])
        .unwrap()[0];
    assert_eq!(row.context.rules, Some(rules));
}

#[test]
fn rule_updates_are_recorded_with_old_rules() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    let first = vec![GrayRuleItem::new("checkout", ["*"])];
    let second = vec![GrayRuleItem::new("billing", ["10.0.0.9"])];
    svc.update_branch_rules(&order_svc(), &branch.cluster_name, first.clone(), "alice")
        .unwrap();
    svc.update_branch_rules(&order_svc(), &branch.cluster_name, second.clone(), "alice")
        .unwrap();

    let newest = &history(&svc)[0];
    assert_eq!(newest.operation, ReleaseOperation::ApplyGrayRules);
    assert_eq!(newest.branch_name, branch.cluster_name);
    assert_eq!(newest.context.rules, Some(second));
    assert_eq!(newest.context.old_rules, Some(first));
}

// ── Cascading sync ─────────────────────────────────────────────────

#[test]
fn cascade_skips_when_branch_config_is_unchanged() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "5"));
    let g1 = gray(&svc, &branch, "g1");

    // Master only moves a key the branch overrides.
    edit(&svc, &order_svc(), ItemChangeSet::default().update("timeout", "60"));
    publish(&svc, &order_svc(), "r2");
    assert_eq!(branch_active(&svc, &branch).unwrap().id, g1.id);

    // A republish with no edits leaves the branch alone too.
    publish(&svc, &order_svc(), "r3");
    assert_eq!(branch_active(&svc, &branch).unwrap().id, g1.id);
}

#[test]
fn cascade_carries_master_changes_into_branch() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "5"));
    let g1 = gray(&svc, &branch, "g1");

    edit(&svc, &order_svc(), ItemChangeSet::default().update("pool", "20"));
    let r2 = publish(&svc, &order_svc(), "r2");

    let g2 = branch_active(&svc, &branch).unwrap();
    assert_ne!(g2.id, g1.id);
    assert_eq!(g2.configuration, config(&[("timeout", "5"), ("pool", "20")]));

    let rows = svc
        .find_history_by_release(g2.id, &[ReleaseOperation::MasterNormalReleaseMergeToGray])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].previous_release_id, g1.id);
    assert_eq!(rows[0].context.base_release_id, Some(r2.id));
    assert_eq!(rows[0].context.branch_release_keys, Some(vec!["timeout".to_string()]));
}

#[test]
fn cascade_keeps_overrides_equal_to_old_master() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    // The branch pins timeout at the master's current value.
    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "30"));
    gray(&svc, &branch, "g1");

    edit(
        &svc,
        &order_svc(),
        ItemChangeSet::default().update("timeout", "45").update("pool", "20"),
    );
    publish(&svc, &order_svc(), "r2");

    let g2 = branch_active(&svc, &branch).unwrap();
    assert_eq!(g2.configuration.get("timeout"), Some("30"));
    assert_eq!(g2.configuration.get("pool"), Some("20"));
}

#[test]
fn order_svc_scenario() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    edit(&svc, &order_svc(), ItemChangeSet::default().create("timeout", "30"));
    let r1 = publish(&svc, &order_svc(), "r1");
    assert_eq!(r1.configuration, config(&[("timeout", "30")]));

    let branch = svc.create_branch(&order_svc(), "alice").unwrap();
    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "5"));
    let b1 = gray(&svc, &branch, "b1");
    assert_eq!(b1.configuration, config(&[("timeout", "5")]));

    edit(&svc, &order_svc(), ItemChangeSet::default().update("timeout", "45"));
    let r2 = publish(&svc, &order_svc(), "r2");
    assert_eq!(r2.configuration, config(&[("timeout", "45")]));

    // The override is preserved; nothing else changed, so no new release.
    let active = branch_active(&svc, &branch).unwrap();
    assert_eq!(active.configuration, config(&[("timeout", "5")]));
    assert_eq!(active.id, b1.id);

    // Once master adds a key, the branch is re-derived from R3.
    edit(&svc, &order_svc(), ItemChangeSet::default().create("retries", "3"));
    let r3 = publish(&svc, &order_svc(), "r3");
    let b2 = branch_active(&svc, &branch).unwrap();
    assert_eq!(b2.configuration, config(&[("timeout", "5"), ("retries", "3")]));
    let row = &svc
        .find_history_by_release(b2.id, &[ReleaseOperation::MasterNormalReleaseMergeToGray])
        .unwrap()[0];
    assert_eq!(row.context.base_release_id, Some(r3.id));
    assert_eq!(row.branch_name, branch.cluster_name);
}

// ── Merge ──────────────────────────────────────────────────────────

#[test]
fn merge_with_delete_tears_branch_down() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "5"));
    let g1 = gray(&svc, &branch, "g1");

    let release = svc
        .merge_branch_to_master(
            &order_svc(),
            &branch.cluster_name,
            &ItemChangeSet::default().update("timeout", "5"),
            &ReleaseRequest::new("merge", "bob"),
            true,
        )
        .unwrap();
    assert_eq!(release.configuration, config(&[("timeout", "5"), ("pool", "10")]));
    assert_eq!(svc.find_branch(&order_svc()).unwrap(), None);

    let rule = svc
        .current_gray_rule(&order_svc(), &branch.cluster_name)
        .unwrap()
        .unwrap();
    assert_eq!(rule.branch_status, BranchStatus::Merged);
    assert!(rule.rules.is_empty());

    let rows = history(&svc);
    assert_eq!(rows[0].operation, ReleaseOperation::GrayReleaseDeletedAfterMerge);
    assert_eq!(rows[1].operation, ReleaseOperation::GrayReleaseMergeToMaster);
    assert_eq!(rows[1].release_id, release.id);
    assert_eq!(rows[1].context.source_branch.as_deref(), Some(branch.cluster_name.as_str()));
    assert_eq!(rows[1].context.base_release_id, Some(g1.id));

    // The master can be branched again.
    svc.create_branch(&order_svc(), "alice").unwrap();
}

#[test]
fn merge_keeping_branch_cascades() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    edit(
        &svc,
        &branch.key(),
        ItemChangeSet::default().create("timeout", "5").create("debug", "true"),
    );
    let g1 = gray(&svc, &branch, "g1");

    svc.merge_branch_to_master(
        &order_svc(),
        &branch.cluster_name,
        &ItemChangeSet::default().update("timeout", "5").update("pool", "20"),
        &ReleaseRequest::new("merge", "bob"),
        false,
    )
    .unwrap();

    assert!(svc.find_branch(&order_svc()).unwrap().is_some());
    let g2 = branch_active(&svc, &branch).unwrap();
    assert_ne!(g2.id, g1.id);
    assert_eq!(
        g2.configuration,
        config(&[("timeout", "5"), ("pool", "20"), ("debug", "true")])
    );
}

#[test]
fn failed_merge_changes_nothing() {
    let svc = service();
    let (r1, branch) = master_with_branch(&svc);
    let before = history(&svc).len();

    let err = svc
        .merge_branch_to_master(
            &order_svc(),
            &branch.cluster_name,
            &ItemChangeSet::default().update("pool", "20").delete("missing"),
            &ReleaseRequest::new("merge", "bob"),
            true,
        )
        .unwrap_err();
    assert!(matches!(err, ReleaseError::NotFound(_)));

    assert_eq!(svc.find_active_release(&order_svc()).unwrap().unwrap().id, r1.id);
    assert_eq!(history(&svc).len(), before);
    assert!(svc.find_branch(&order_svc()).unwrap().is_some());
    let pool = svc
        .find_items(&order_svc())
        .unwrap()
        .into_iter()
        .find(|item| item.key == "pool")
        .unwrap();
    assert_eq!(pool.value, "10");
}

#[test]
fn abandoning_a_branch_records_it() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    assert!(
        svc.delete_branch(&order_svc(), &branch.cluster_name, BranchStatus::Deleted, "alice")
            .unwrap()
    );
    assert_eq!(svc.find_branch(&order_svc()).unwrap(), None);
    assert_eq!(history(&svc)[0].operation, ReleaseOperation::AbandonGrayRelease);

    let err = svc
        .publish_gray(&order_svc(), &branch.cluster_name, &ReleaseRequest::new("g", "bob"), None)
        .unwrap_err();
    assert!(matches!(err, ReleaseError::NotFound(_)));
}

#[test]
fn only_one_branch_per_master() {
    let svc = service();
    let (_, branch) = master_with_branch(&svc);
    let err = svc.create_branch(&order_svc(), "alice").unwrap_err();
    assert!(matches!(err, ReleaseError::BadRequest(_)));

    let err = svc.create_branch(&branch.key(), "alice").unwrap_err();
    assert!(matches!(err, ReleaseError::BadRequest(_)));
}

// ── Rollback ───────────────────────────────────────────────────────

#[test]
fn rollback_needs_a_previous_release() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    let r1 = publish(&svc, &order_svc(), "r1");
    let err = svc.rollback(r1.id, "bob").unwrap_err();
    assert!(matches!(err, ReleaseError::BadRequest(_)));

    let r2 = publish(&svc, &order_svc(), "r2");
    let abandoned = svc.rollback(r2.id, "bob").unwrap();
    assert_eq!(abandoned.id, r2.id);
    assert!(abandoned.abandoned);
    assert_eq!(svc.find_active_release(&order_svc()).unwrap().unwrap().id, r1.id);

    let err = svc.rollback(r2.id, "bob").unwrap_err();
    assert!(matches!(err, ReleaseError::BadRequest(_)));
    let err = svc.rollback(999, "bob").unwrap_err();
    assert!(matches!(err, ReleaseError::NotFound(_)));
}

#[test]
fn rollback_re_derives_branch() {
    let svc = service();
    let (r1, branch) = master_with_branch(&svc);
    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "5"));
    gray(&svc, &branch, "g1");
    edit(&svc, &order_svc(), ItemChangeSet::default().update("pool", "20"));
    let r2 = publish(&svc, &order_svc(), "r2");
    let g2 = branch_active(&svc, &branch).unwrap();

    svc.rollback(r2.id, "bob").unwrap();

    let g3 = branch_active(&svc, &branch).unwrap();
    assert_ne!(g3.id, g2.id);
    assert_eq!(g3.configuration, config(&[("timeout", "5"), ("pool", "10")]));
    assert!(g3.name.ends_with("-master-rollback-merge-to-gray"));

    let row = &svc
        .find_history_by_release(g3.id, &[ReleaseOperation::MasterRollbackMergeToGray])
        .unwrap()[0];
    assert_eq!(row.context.base_release_id, Some(r1.id));
}

#[test]
fn rollback_to_abandons_the_range() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    let r1 = publish(&svc, &order_svc(), "r1");
    let r2 = publish(&svc, &order_svc(), "r2");
    let r3 = publish(&svc, &order_svc(), "r3");

    let abandoned = svc.rollback_to(r3.id, r1.id, "bob").unwrap();
    assert_eq!(abandoned.id, r3.id);
    assert!(svc.find_release(r2.id).unwrap().unwrap().abandoned);
    assert!(svc.find_release(r3.id).unwrap().unwrap().abandoned);
    assert_eq!(svc.find_active_release(&order_svc()).unwrap().unwrap().id, r1.id);

    let row = &history(&svc)[0];
    assert_eq!(row.operation, ReleaseOperation::Rollback);
    assert_eq!((row.release_id, row.previous_release_id), (r1.id, r3.id));
}

#[test]
fn rollback_to_rejects_other_namespaces() {
    let svc = service();
    let other = NamespaceKey::new("orderSvc", "default", "datasource");
    svc.create_namespace(&order_svc(), "alice").unwrap();
    svc.create_namespace(&other, "alice").unwrap();
    let a = publish(&svc, &order_svc(), "a");
    let b = publish(&svc, &other, "b");

    let err = svc.rollback_to(b.id, a.id, "bob").unwrap_err();
    assert!(matches!(err, ReleaseError::BadRequest(_)));
}

// ── History ────────────────────────────────────────────────────────

#[test]
fn each_release_change_adds_one_matching_history_row() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    let mut count = history(&svc).len();
    let mut expect_row = |svc: &ReleaseService, op: ReleaseOperation, after: ReleaseId, before: ReleaseId| {
        let rows = history(svc);
        assert_eq!(rows.len(), count + 1);
        count += 1;
        assert_eq!(rows[0].operation, op);
        assert_eq!((rows[0].release_id, rows[0].previous_release_id), (after, before));
    };

    let r1 = publish(&svc, &order_svc(), "r1");
    expect_row(&svc, ReleaseOperation::NormalRelease, r1.id, 0);
    let r2 = publish(&svc, &order_svc(), "r2");
    expect_row(&svc, ReleaseOperation::NormalRelease, r2.id, r1.id);
    let r3 = publish(&svc, &order_svc(), "r3");
    expect_row(&svc, ReleaseOperation::NormalRelease, r3.id, r2.id);

    svc.rollback(r3.id, "bob").unwrap();
    expect_row(&svc, ReleaseOperation::Rollback, r2.id, r3.id);
    svc.rollback_to(r2.id, r1.id, "bob").unwrap();
    expect_row(&svc, ReleaseOperation::Rollback, r1.id, r2.id);

    let branch = svc.create_branch(&order_svc(), "alice").unwrap();
    let g1 = gray(&svc, &branch, "g1");
    expect_row(&svc, ReleaseOperation::GrayRelease, g1.id, 0);
}

#[test]
fn emergency_flag_is_recorded() {
    let svc = service();
    svc.create_namespace(&order_svc(), "alice").unwrap();
    let release = svc
        .publish(&order_svc(), &ReleaseRequest::new("hotfix", "bob").emergency(true))
        .unwrap();
    let row = &svc
        .find_history_by_release(release.id, &[])
        .unwrap()[0];
    assert_eq!(row.context.is_emergency_publish, Some(true));
}

// ── Notifications ──────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<String>>,
}

impl ReleaseNotifier for Recorder {
    fn announce(&self, message: &ReleaseMessage) -> Result<(), String> {
        self.messages.lock().unwrap().push(message.message.clone());
        Ok(())
    }
}

struct Broken;

impl ReleaseNotifier for Broken {
    fn announce(&self, _message: &ReleaseMessage) -> Result<(), String> {
        Err("transport down".into())
    }
}

#[test]
fn master_publish_with_cascade_announces_once() {
    let recorder = Arc::new(Recorder::default());
    let svc = ReleaseService::new(StateStore::open_in_memory().unwrap(), recorder.clone());
    let (_, branch) = master_with_branch(&svc);
    edit(&svc, &branch.key(), ItemChangeSet::default().create("timeout", "5"));
    gray(&svc, &branch, "g1");
    edit(&svc, &order_svc(), ItemChangeSet::default().update("pool", "20"));
    recorder.messages.lock().unwrap().clear();

    publish(&svc, &order_svc(), "r2");
    assert_eq!(
        *recorder.messages.lock().unwrap(),
        vec!["orderSvc+default+application".to_string()]
    );
}

#[test]
fn gray_publish_announces_the_master() {
    let recorder = Arc::new(Recorder::default());
    let svc = ReleaseService::new(StateStore::open_in_memory().unwrap(), recorder.clone());
    let (_, branch) = master_with_branch(&svc);
    recorder.messages.lock().unwrap().clear();

    gray(&svc, &branch, "g1");
    assert_eq!(
        *recorder.messages.lock().unwrap(),
        vec!["orderSvc+default+application".to_string()]
    );
}

#[test]
fn edits_are_not_announced() {
    let recorder = Arc::new(Recorder::default());
    let svc = ReleaseService::new(StateStore::open_in_memory().unwrap(), recorder.clone());
    svc.create_namespace(&order_svc(), "alice").unwrap();
    edit(&svc, &order_svc(), ItemChangeSet::default().create("timeout", "30"));
    assert!(recorder.messages.lock().unwrap().is_empty());
}

#[test]
fn broken_notifier_does_not_undo_the_release() {
    let svc = ReleaseService::new(StateStore::open_in_memory().unwrap(), Arc::new(Broken));
    svc.create_namespace(&order_svc(), "alice").unwrap();
    let release = publish(&svc, &order_svc(), "r1");
    assert_eq!(svc.find_active_release(&order_svc()).unwrap(), Some(release));
}

#[test]
fn broadcast_subscribers_receive_messages() {
    let notifier = Arc::new(BroadcastNotifier::new(8));
    let mut rx = notifier.subscribe();
    let svc = ReleaseService::new(StateStore::open_in_memory().unwrap(), notifier);
    svc.create_namespace(&order_svc(), "alice").unwrap();
    publish(&svc, &order_svc(), "r1");

    let message = rx.try_recv().unwrap();
    assert_eq!(message, ReleaseMessage::for_namespace(&order_svc()));
}

// ── Persistence ────────────────────────────────────────────────────

#[test]
fn releases_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confgrid.redb");
    let release = {
        let svc = ReleaseService::new(StateStore::open(&path).unwrap(), Arc::new(NoopNotifier));
        svc.create_namespace(&order_svc(), "alice").unwrap();
        edit(&svc, &order_svc(), ItemChangeSet::default().create("timeout", "30"));
        publish(&svc, &order_svc(), "r1")
    };

    let svc = ReleaseService::new(StateStore::open(&path).unwrap(), Arc::new(NoopNotifier));
    assert_eq!(svc.find_active_release(&order_svc()).unwrap(), Some(release));
    assert_eq!(history(&svc).len(), 1);
}
