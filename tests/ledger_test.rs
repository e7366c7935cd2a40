mod common;

use std::sync::Arc;

use anyhow::Result;
use cambio::application::{
    AccountLedger, AddFundsRequest, ConvertRequest, IssueCardRequest, LedgerError, LedgerSettings,
};
use cambio::domain::TransactionKind;
use cambio::storage::StoreError;
use common::{
    ConflictingStore, PREPAID_CODE, fund, register, test_ledger, test_rates, test_store,
};

#[tokio::test]
async fn test_end_to_end_wallet_flow() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;

    let user = register(&ledger, "alice").await?;
    assert_eq!(user.balance, 0);

    let topup = ledger
        .add_funds(user.id, AddFundsRequest::new(PREPAID_CODE, "500.00"))
        .await?;
    assert_eq!(topup.user.balance, 50000);

    let issuance = ledger
        .issue_card(user.id, IssueCardRequest::new("200.00", "GYD"))
        .await?;
    assert_eq!(issuance.user.balance, 30000);
    assert_eq!(issuance.card.amount, 20000);

    let conversion = ledger
        .convert(user.id, ConvertRequest::new("100.00", "GYD", "USD"))
        .await?;
    assert_eq!(conversion.converted_amount, 48);
    assert_eq!(ledger.balance(user.id).await?.balance, 30000);

    let kinds: Vec<_> = ledger
        .list_transactions(user.id)
        .await?
        .iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransactionKind::Conversion,
            TransactionKind::CardIssuance,
            TransactionKind::Topup,
        ]
    );

    let report = ledger.reconcile(user.id).await?;
    assert!(report.is_consistent(), "issues: {:?}", report.issues);
    assert_eq!(report.credits, 50000);
    assert_eq!(report.debits, 20000);
    assert_eq!(report.expected_balance, 30000);
    assert_eq!(report.transaction_count, 3);

    Ok(())
}

#[tokio::test]
async fn test_reads_are_idempotent() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let user = register(&ledger, "alice").await?;
    fund(&ledger, user.id, "500.00").await?;
    ledger
        .issue_card(user.id, IssueCardRequest::new("50.00", "GYD"))
        .await?;

    let first = ledger.list_transactions(user.id).await?;
    let second = ledger.list_transactions(user.id).await?;
    assert_eq!(first, second);

    let cards_first = ledger.list_active_cards(user.id).await?;
    let cards_second = ledger.list_active_cards(user.id).await?;
    assert_eq!(cards_first, cards_second);

    assert_eq!(
        ledger.balance(user.id).await?.balance,
        ledger.balance(user.id).await?.balance
    );

    Ok(())
}

#[tokio::test]
async fn test_users_are_isolated() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let alice = register(&ledger, "alice").await?;
    let bob = register(&ledger, "bob").await?;

    fund(&ledger, alice.id, "100.00").await?;
    ledger
        .issue_card(alice.id, IssueCardRequest::new("40.00", "GYD"))
        .await?;

    assert_eq!(ledger.balance(bob.id).await?.balance, 0);
    assert!(ledger.list_transactions(bob.id).await?.is_empty());
    assert!(ledger.list_active_cards(bob.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_reads_for_unknown_user() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;

    assert!(matches!(
        ledger.balance(7).await.unwrap_err(),
        LedgerError::NotFound(_)
    ));
    assert!(matches!(
        ledger.list_transactions(7).await.unwrap_err(),
        LedgerError::NotFound(_)
    ));
    assert!(matches!(
        ledger.list_active_cards(7).await.unwrap_err(),
        LedgerError::NotFound(_)
    ));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_topups_both_apply() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let ledger = Arc::new(ledger);
    let user = register(&ledger, "alice").await?;
    fund(&ledger, user.id, "100.00").await?;

    let mut handles = Vec::new();
    for amount in ["50.00", "75.00"] {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .add_funds(user.id, AddFundsRequest::new(PREPAID_CODE, amount))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(ledger.balance(user.id).await?.balance, 22500);
    let topups = ledger
        .list_transactions(user.id)
        .await?
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Topup)
        .count();
    assert_eq!(topups, 3);
    assert!(ledger.reconcile(user.id).await?.is_consistent());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_card_issuance_never_overdraws() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let ledger = Arc::new(ledger);
    let user = register(&ledger, "alice").await?;
    fund(&ledger, user.id, "100.00").await?;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .issue_card(user.id, IssueCardRequest::new("10.00", "GYD"))
                .await
        }));
    }

    let mut issued = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => issued += 1,
            Err(LedgerError::InsufficientBalance { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(issued, 10);
    assert_eq!(ledger.balance(user.id).await?.balance, 0);
    assert_eq!(ledger.list_active_cards(user.id).await?.len(), 10);
    assert!(ledger.reconcile(user.id).await?.is_consistent());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_users_do_not_block_each_other() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let ledger = Arc::new(ledger);

    let mut users = Vec::new();
    for name in ["alice", "bob", "carol"] {
        users.push(register(&ledger, name).await?);
    }

    let mut handles = Vec::new();
    for user in &users {
        for _ in 0..5 {
            let ledger = ledger.clone();
            let user_id = user.id;
            handles.push(tokio::spawn(async move {
                ledger
                    .add_funds(user_id, AddFundsRequest::new(PREPAID_CODE, "10.00"))
                    .await
            }));
        }
    }
    for handle in handles {
        handle.await??;
    }

    for user in &users {
        assert_eq!(ledger.balance(user.id).await?.balance, 5000);
        assert_eq!(ledger.list_transactions(user.id).await?.len(), 5);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_ledgers_over_one_store_settle_topups() -> Result<()> {
    // Separate ledgers do not share user locks; only the balance check guards them.
    let (store, _temp) = test_store().await?;
    let first = Arc::new(AccountLedger::new(store.clone(), test_rates()));
    let second = Arc::new(AccountLedger::new(store, test_rates()));
    let user = register(&first, "alice").await?;
    fund(&first, user.id, "100.00").await?;

    let mut handles = Vec::new();
    for (ledger, amount) in [(first.clone(), "50.00"), (second.clone(), "75.00")] {
        handles.push(tokio::spawn(async move {
            ledger
                .add_funds(user.id, AddFundsRequest::new(PREPAID_CODE, amount))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(second.balance(user.id).await?.balance, 22500);
    assert_eq!(first.list_transactions(user.id).await?.len(), 3);
    assert!(first.reconcile(user.id).await?.is_consistent());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_ledgers_over_one_store_never_overdraw() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let ledgers = [
        Arc::new(AccountLedger::new(store.clone(), test_rates())),
        Arc::new(AccountLedger::new(store, test_rates())),
    ];
    let user = register(&ledgers[0], "alice").await?;
    fund(&ledgers[0], user.id, "100.00").await?;

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = ledgers[i % 2].clone();
        handles.push(tokio::spawn(async move {
            ledger
                .issue_card(user.id, IssueCardRequest::new("10.00", "GYD"))
                .await
        }));
    }

    let mut issued = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => issued += 1,
            Err(LedgerError::InsufficientBalance { .. }) => {}
            // Retries can run out under contention; that must leave nothing behind.
            Err(LedgerError::Store(StoreError::Conflict(_))) => {}
            Err(other) => return Err(other.into()),
        }
    }

    let balance = ledgers[1].balance(user.id).await?.balance;
    assert!(balance >= 0);
    assert_eq!(balance + issued * 1000, 10000);
    assert_eq!(
        ledgers[0].list_active_cards(user.id).await?.len() as i64,
        issued
    );
    assert!(ledgers[0].reconcile(user.id).await?.is_consistent());

    Ok(())
}

#[tokio::test]
async fn test_stale_balance_is_reread_and_retried() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let conflicting = Arc::new(ConflictingStore::new(store, 2));
    let ledger = AccountLedger::new(conflicting.clone(), test_rates());
    let user = register(&ledger, "alice").await?;

    let result = ledger
        .add_funds(user.id, AddFundsRequest::new(PREPAID_CODE, "500.00"))
        .await?;

    assert_eq!(result.user.balance, 50000);
    assert_eq!(conflicting.units_begun(), 3);
    assert_eq!(ledger.list_transactions(user.id).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_persistent_conflict_gives_up_without_changes() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let conflicting = Arc::new(ConflictingStore::new(store, u32::MAX));
    let ledger =
        AccountLedger::new(conflicting.clone(), test_rates()).with_settings(LedgerSettings {
            balance_attempts: 4,
            ..LedgerSettings::default()
        });
    let user = register(&ledger, "alice").await?;

    let err = ledger
        .add_funds(user.id, AddFundsRequest::new(PREPAID_CODE, "500.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Store(StoreError::Conflict(id)) if id == user.id));
    assert!(err.is_retryable());
    assert_eq!(conflicting.units_begun(), 4);

    assert_eq!(ledger.balance(user.id).await?.balance, 0);
    assert!(ledger.list_transactions(user.id).await?.is_empty());
    assert!(ledger.list_active_cards(user.id).await?.is_empty());

    Ok(())
}
