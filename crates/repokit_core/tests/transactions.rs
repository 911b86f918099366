mod common;

use common::{
    add_part, ephemeral_db, part_count, tx_manager, widget_repo, widget_service, Widget,
};
use repokit_core::{
    DomainError, DomainResult, ErrorKind, IsolationLevel, QueryModifier, Repository, ScopeState,
    SqliteTransactionManager, TransactionManager,
};
use std::panic::{catch_unwind, AssertUnwindSafe};

#[test]
fn committed_work_is_visible_and_failed_work_leaves_nothing() {
    let db = ephemeral_db();
    let repo = widget_repo(&db);
    let txm = tx_manager(&db);

    txm.with_tx(|tx| {
        let mut widget = Widget::new("kept", 1);
        repo.with_tx(tx).create(&mut widget)?;
        add_part(tx, widget.meta.id, 1, "rim")
    })
    .unwrap();

    let err = txm
        .with_tx(|tx| {
            let mut widget = Widget::new("discarded", 1);
            repo.with_tx(tx).create(&mut widget)?;
            add_part(tx, widget.meta.id, 1, "spoke")?;
            add_part(tx, widget.meta.id, 1, "duplicate position")
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(repo.count(&[]).unwrap(), 1);
    assert_eq!(part_count(&db), 1);
}

#[test]
fn nested_with_tx_joins_the_open_scope() {
    let db = ephemeral_db();
    let repo = widget_repo(&db);
    let txm = tx_manager(&db);

    let (outer_id, inner_id) = txm
        .with_tx(|outer| {
            repo.with_tx(outer).create(&mut Widget::new("outer", 1))?;
            let inner_id = txm.with_tx(|inner| {
                repo.with_tx(inner).create(&mut Widget::new("inner", 1))?;
                Ok(inner.id())
            })?;
            Ok((outer.id(), inner_id))
        })
        .unwrap();

    assert_eq!(outer_id, inner_id);
    assert_eq!(repo.count(&[]).unwrap(), 2);
}

#[test]
fn outer_failure_discards_joined_work() {
    let db = ephemeral_db();
    let repo = widget_repo(&db);
    let txm = tx_manager(&db);

    let err = txm
        .with_tx(|_| -> DomainResult<()> {
            txm.with_tx(|inner| repo.with_tx(inner).create(&mut Widget::new("inner", 1)))?;
            Err(DomainError::forbidden("caller lacks permission"))
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(repo.count(&[]).unwrap(), 0);
}

#[test]
fn swallowed_nested_failure_rolls_back_outer_scope() {
    let db = ephemeral_db();
    let repo = widget_repo(&db);
    let txm = tx_manager(&db);

    let err = txm
        .with_tx(|outer| {
            repo.with_tx(outer).create(&mut Widget::new("first", 1))?;
            let nested = txm.with_tx(|inner| repo.with_tx(inner).create(&mut Widget::new("first", 2)));
            assert_eq!(nested.unwrap_err().kind(), ErrorKind::AlreadyExists);
            assert_eq!(outer.state(), ScopeState::RollbackOnly);
            Ok(())
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.code(), "tx_rollback_only");
    assert_eq!(repo.count(&[]).unwrap(), 0);
}

#[test]
fn explicit_join_marks_scope_rollback_only_on_failure() {
    let db = ephemeral_db();
    let txm = tx_manager(&db);

    let err = txm
        .with_tx(|outer| {
            let joined = txm.join_tx(outer, |_| -> DomainResult<()> {
                Err(DomainError::validation("rejected"))
            });
            assert!(joined.is_err());
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.code(), "tx_rollback_only");
}

#[test]
fn nested_call_joins_whatever_isolation_it_requests() {
    let db = ephemeral_db();
    let txm = tx_manager(&db);

    let (outer_id, joined) = txm
        .with_tx_isolation(IsolationLevel::RepeatableRead, |outer| {
            let plain = txm.with_tx(|inner| Ok(inner.id()))?;
            let stronger =
                txm.with_tx_isolation(IsolationLevel::Serializable, |inner| Ok(inner.id()))?;
            Ok((outer.id(), [plain, stronger]))
        })
        .unwrap();
    assert_eq!(joined, [outer_id, outer_id]);

    let err = txm
        .with_tx_isolation(IsolationLevel::ReadCommitted, |_| {
            txm.with_tx_isolation(IsolationLevel::Linearizable, |_| Ok(()))
        })
        .unwrap_err();
    assert_eq!(err.code(), "tx_isolation_unsupported");
}

#[test]
fn service_mutation_joins_caller_scope_opened_at_weaker_level() {
    let db = ephemeral_db();
    let outer = widget_service(&db).with_isolation(IsolationLevel::ReadCommitted);
    let inner = widget_service(&db);

    outer
        .atomically(|_, _| inner.create(&mut Widget::new("nested", 1)))
        .unwrap();
    assert_eq!(inner.count(&[]).unwrap(), 1);

    let err = outer
        .atomically(|_, _| -> DomainResult<()> {
            inner.create(&mut Widget::new("discarded", 1))?;
            Err(DomainError::validation("caller rejected the batch"))
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(inner.count(&[]).unwrap(), 1);
}

#[test]
fn unsupported_isolation_fails_fast() {
    let db = ephemeral_db();
    let txm = tx_manager(&db);

    for level in [IsolationLevel::WriteCommitted, IsolationLevel::Linearizable] {
        let err = txm.with_tx_isolation(level, |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.code(), "tx_isolation_unsupported");
    }

    let misconfigured = SqliteTransactionManager::new(db.clone(), IsolationLevel::Linearizable);
    assert!(misconfigured.with_tx(|_| Ok(())).is_err());
}

#[test]
fn ended_handle_cannot_be_reused() {
    let db = ephemeral_db();
    let repo = widget_repo(&db);
    let txm = tx_manager(&db);

    let stale = txm.with_tx(|tx| Ok(tx.clone())).unwrap();
    assert_eq!(stale.state(), ScopeState::Committed);

    let err = repo
        .with_tx(&stale)
        .create(&mut Widget::new("late", 1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.code(), "tx_ended");

    let err = txm.join_tx(&stale, |_| Ok(())).unwrap_err();
    assert_eq!(err.code(), "tx_ended");
}

#[test]
fn panic_inside_work_rolls_back() {
    let db = ephemeral_db();
    let repo = widget_repo(&db);
    let txm = tx_manager(&db);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        txm.with_tx(|tx| -> DomainResult<()> {
            repo.with_tx(tx).create(&mut Widget::new("doomed", 1))?;
            panic!("work failed midway");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(repo.count(&[]).unwrap(), 0);
    txm.with_tx(|tx| repo.with_tx(tx).create(&mut Widget::new("after", 1)))
        .unwrap();
    assert_eq!(repo.count(&[]).unwrap(), 1);
}

#[test]
fn unbound_repository_reads_its_own_scope() {
    let db = ephemeral_db();
    let repo = widget_repo(&db);
    let txm = tx_manager(&db);

    txm.with_tx(|tx| {
        let mut widget = Widget::new("draft", 1);
        repo.with_tx(tx).create(&mut widget)?;

        assert!(repo.exists(&widget.meta.id)?);
        let seen = repo.get_by_id(&widget.meta.id, &[QueryModifier::IncludeDeleted])?;
        assert_eq!(seen.name, "draft");
        Ok(())
    })
    .unwrap();
}

#[test]
fn isolation_reported_by_handle_matches_request() {
    let db = ephemeral_db();
    let txm = tx_manager(&db);

    let isolation = txm
        .with_tx_isolation(IsolationLevel::RepeatableRead, |tx| Ok(tx.isolation()))
        .unwrap();
    assert_eq!(isolation, IsolationLevel::RepeatableRead);
    assert_eq!(txm.default_isolation(), IsolationLevel::Serializable);
}
