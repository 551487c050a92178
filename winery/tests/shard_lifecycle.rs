//! Catalog-level shard locking and rollback-on-drop behavior, independent
//! of any writer/packer machinery.

use uuid::Uuid;

use winery::catalog::Catalog;
use winery::shard_lock::ShardLock;
use winery::state::ShardState;

#[sqlx::test]
async fn lock_one_shard_skips_locked_rows_for_other_lockers(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let locker_a = Uuid::new_v4();
    let locker_b = Uuid::new_v4();

    let (name, _id) = catalog.create_shard(ShardState::Standby, locker_a).await.unwrap();
    catalog.set_shard_state(&name, ShardState::Standby, locker_a).await.unwrap();

    let claimed = catalog
        .lock_one_shard(ShardState::Standby, ShardState::Writing, 0, locker_b)
        .await
        .unwrap();
    assert_eq!(claimed.as_ref().map(|(n, _)| n.as_str()), Some(name.as_str()));

    // Already WRITING; a second locker finds nothing to claim.
    let nothing = catalog
        .lock_one_shard(ShardState::Standby, ShardState::Writing, 0, locker_a)
        .await
        .unwrap();
    assert!(nothing.is_none());
}

#[sqlx::test]
async fn lock_named_shard_rejects_wrong_state(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let locker = Uuid::new_v4();
    let (name, _id) = catalog.create_shard(ShardState::Writing, locker).await.unwrap();
    catalog.set_shard_state(&name, ShardState::Full, locker).await.unwrap();

    let locked = catalog
        .lock_named_shard(&name, ShardState::Full, ShardState::Packing, locker)
        .await
        .unwrap();
    assert!(locked);

    // Already PACKING now; a second attempt at the same transition fails.
    let locked_again = catalog
        .lock_named_shard(&name, ShardState::Full, ShardState::Packing, locker)
        .await
        .unwrap();
    assert!(!locked_again);
}

#[sqlx::test]
async fn shard_lock_rolls_back_on_drop_without_commit(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let locker = Uuid::new_v4();
    let (name, _id) = catalog.create_shard(ShardState::Writing, locker).await.unwrap();
    catalog.set_shard_state(&name, ShardState::Full, locker).await.unwrap();

    catalog
        .lock_named_shard(&name, ShardState::Full, ShardState::Packing, locker)
        .await
        .unwrap();

    {
        let _guard = ShardLock::new(&catalog, name.clone(), locker, ShardState::Full);
        // Simulate a packer that crashes before calling `commit()`.
    }

    // The rollback task is spawned on drop; give it a moment to land.
    for _ in 0..50 {
        if catalog.get_shard_state(&name).await.unwrap() == Some(ShardState::Full) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(catalog.get_shard_state(&name).await.unwrap(), Some(ShardState::Full));
}

#[sqlx::test]
async fn shard_lock_commit_leaves_state_alone(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let locker = Uuid::new_v4();
    let (name, _id) = catalog.create_shard(ShardState::Writing, locker).await.unwrap();
    catalog.set_shard_state(&name, ShardState::Full, locker).await.unwrap();
    catalog
        .lock_named_shard(&name, ShardState::Full, ShardState::Packing, locker)
        .await
        .unwrap();

    let guard = ShardLock::new(&catalog, name.clone(), locker, ShardState::Full);
    catalog.set_shard_state(&name, ShardState::Packed, locker).await.unwrap();
    guard.commit();

    assert_eq!(catalog.get_shard_state(&name).await.unwrap(), Some(ShardState::Packed));
}
