//! End-to-end exercise of the write -> pack -> read path against a real
//! Postgres catalog (`#[sqlx::test]` provisions and tears down an
//! isolated database per test) and a directory-backed image pool.

use std::sync::Arc;

use tempfile::tempdir;

use winery::catalog::Catalog;
use winery::object_id::ObjectId;
use winery::pool::directory::DirectoryPool;
use winery::pool::ImagePool;
use winery::reader::Reader;
use winery::stats::Stats;
use winery::throttler::NoopThrottler;
use winery::writer::Writer;
use winery::{packer::Packer, ShardState};

fn small_shards_config() -> winery_config::Shards {
    winery_config::Shards {
        max_size: 64,
        rw_idle_timeout: 300,
    }
}

#[sqlx::test]
async fn write_then_read_back_before_packing(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let images = tempdir().unwrap();
    let image_pool: Arc<dyn ImagePool> = Arc::new(DirectoryPool::new(images.path(), 1024 * 1024));
    let throttler = Arc::new(NoopThrottler);
    let stats = Arc::new(Stats::default());

    let writer = Writer::new(
        catalog.clone(),
        image_pool.clone(),
        throttler.clone(),
        winery_config::Shards::default(),
        winery_config::Packer::default(),
        true,
        false,
        stats.clone(),
    );

    let obj_id = ObjectId::for_content(b"hello winery");
    writer.add(b"hello winery", &obj_id, true).await.unwrap();

    let reader = Reader::new(catalog, image_pool, throttler, stats, 4);
    let content = reader.get(&obj_id).await.unwrap();
    assert_eq!(&content[..], b"hello winery");
    assert!(reader.contains(&obj_id).await.unwrap());
}

#[sqlx::test]
async fn filling_a_shard_seals_it_and_packing_makes_it_readable_via_ro_image(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let images = tempdir().unwrap();
    let image_pool: Arc<dyn ImagePool> = Arc::new(DirectoryPool::new(images.path(), 1024 * 1024));
    let throttler = Arc::new(NoopThrottler);
    let stats = Arc::new(Stats::default());

    let writer = Writer::new(
        catalog.clone(),
        image_pool.clone(),
        throttler.clone(),
        small_shards_config(),
        winery_config::Packer {
            create_images: true,
            pack_immediately: false,
            clean_immediately: false,
        },
        true,
        false,
        stats.clone(),
    );

    let ids: Vec<ObjectId> = (0..5)
        .map(|i| ObjectId::for_content(format!("object number {i}").as_bytes()))
        .collect();
    for (i, id) in ids.iter().enumerate() {
        let content = format!("object number {i}");
        writer.add(content.as_bytes(), id, true).await.unwrap();
    }

    let filled = writer.filled_shards().await;
    assert_eq!(filled.len(), 1, "64-byte shard should have sealed after a few small objects");
    let shard_name = filled[0].clone();
    assert_eq!(
        catalog.get_shard_state(&shard_name).await.unwrap(),
        Some(ShardState::Full)
    );

    let packer = Packer::new(catalog.clone(), image_pool.clone(), throttler.clone(), winery_config::Packer::default());
    let packed = packer.pack_one().await.unwrap();
    assert!(packed);
    assert_eq!(
        catalog.get_shard_state(&shard_name).await.unwrap(),
        Some(ShardState::Packed)
    );

    let reader = Reader::new(catalog, image_pool, throttler, stats, 4);
    for (i, id) in ids.iter().enumerate() {
        let expected = format!("object number {i}");
        let content = reader.get(id).await.unwrap();
        assert_eq!(&content[..], expected.as_bytes());
    }
}

#[sqlx::test]
async fn get_batch_tolerates_unknown_ids(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let images = tempdir().unwrap();
    let image_pool: Arc<dyn ImagePool> = Arc::new(DirectoryPool::new(images.path(), 1024 * 1024));
    let throttler = Arc::new(NoopThrottler);
    let stats = Arc::new(Stats::default());

    let writer = Writer::new(
        catalog.clone(),
        image_pool.clone(),
        throttler.clone(),
        winery_config::Shards::default(),
        winery_config::Packer::default(),
        true,
        false,
        stats.clone(),
    );

    let known = ObjectId::for_content(b"known content");
    writer.add(b"known content", &known, true).await.unwrap();
    let unknown = ObjectId::for_content(b"never written");

    let reader = Reader::new(catalog, image_pool, throttler, stats, 4);
    let results = reader.get_batch(&[known.clone(), unknown]).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_deref(), Some(&b"known content"[..]));
    assert_eq!(results[1], None);
}

#[sqlx::test]
async fn delete_then_get_returns_not_found(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let images = tempdir().unwrap();
    let image_pool: Arc<dyn ImagePool> = Arc::new(DirectoryPool::new(images.path(), 1024 * 1024));
    let throttler = Arc::new(NoopThrottler);
    let stats = Arc::new(Stats::default());

    let writer = Writer::new(
        catalog.clone(),
        image_pool.clone(),
        throttler.clone(),
        winery_config::Shards::default(),
        winery_config::Packer::default(),
        true,
        false,
        stats.clone(),
    );

    let obj_id = ObjectId::for_content(b"doomed content");
    writer.add(b"doomed content", &obj_id, true).await.unwrap();
    writer.delete(&obj_id).await.unwrap();

    let reader = Reader::new(catalog, image_pool, throttler, stats, 4);
    assert!(matches!(reader.get(&obj_id).await, Err(winery::Error::NotFound)));
}

#[sqlx::test]
async fn delete_without_allow_delete_is_permission_denied(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let images = tempdir().unwrap();
    let image_pool: Arc<dyn ImagePool> = Arc::new(DirectoryPool::new(images.path(), 1024 * 1024));
    let throttler = Arc::new(NoopThrottler);
    let stats = Arc::new(Stats::default());

    let writer = Writer::new(
        catalog.clone(),
        image_pool.clone(),
        throttler.clone(),
        winery_config::Shards::default(),
        winery_config::Packer::default(),
        false,
        false,
        stats.clone(),
    );

    let obj_id = ObjectId::for_content(b"protected content");
    writer.add(b"protected content", &obj_id, true).await.unwrap();

    assert!(matches!(
        writer.delete(&obj_id).await,
        Err(winery::Error::PermissionDenied)
    ));

    let reader = Reader::new(catalog, image_pool, throttler, stats, 4);
    assert_eq!(&reader.get(&obj_id).await.unwrap()[..], b"protected content");
}

#[sqlx::test]
async fn add_on_read_only_backend_is_rejected(pool: sqlx::PgPool) {
    let catalog = Catalog::from_pool(pool);
    catalog.migrate().await.unwrap();

    let images = tempdir().unwrap();
    let image_pool: Arc<dyn ImagePool> = Arc::new(DirectoryPool::new(images.path(), 1024 * 1024));
    let throttler = Arc::new(NoopThrottler);
    let stats = Arc::new(Stats::default());

    let writer = Writer::new(
        catalog,
        image_pool,
        throttler,
        winery_config::Shards::default(),
        winery_config::Packer::default(),
        true,
        true,
        stats,
    );

    let obj_id = ObjectId::for_content(b"should never land");
    assert!(matches!(
        writer.add(b"should never land", &obj_id, true).await,
        Err(winery::Error::ReadOnly)
    ));
}
