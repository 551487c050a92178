//! Drives a shard through its entire lifecycle: write, seal, pack, map the
//! RO image, drop the RW table, delete an object, and punch it out of the
//! RO image.

use std::sync::Arc;

use tempfile::tempdir;

use winery::catalog::Catalog;
use winery::cleaner::RwShardCleaner;
use winery::deleted_objects::DeletedObjectsCleaner;
use winery::image_manager::ImageManager;
use winery::object_id::ObjectId;
use winery::pool::directory::DirectoryPool;
use winery::pool::{ImagePool, MapMode};
use winery::reader::Reader;
use winery::stats::Stats;
use winery::throttler::NoopThrottler;
use winery::writer::Writer;
use winery::{packer::Packer, ShardState};

fn small_shards_config() -> winery_config::Shards {
    winery_config::Shards {
        max_size: 20,
        rw_idle_timeout: 300,
    }
}

#[sqlx::test]
async fn full_lifecycle_from_write_to_deleted_punch(pool: sqlx::PgPool) {
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
        winery_config::Packer::default(),
        true,
        false,
        stats.clone(),
    );

    let keep = ObjectId::for_content(b"keep me around");
    let remove = ObjectId::for_content(b"punch me out!!!");
    writer.add(b"keep me around", &keep, true).await.unwrap();
    writer.add(b"punch me out!!!", &remove, true).await.unwrap();

    let shard_name = writer
        .filled_shards()
        .await
        .into_iter()
        .next()
        .expect("two objects should have sealed a 20-byte shard");

    let packer = Packer::new(
        catalog.clone(),
        image_pool.clone(),
        throttler.clone(),
        winery_config::Packer::default(),
    );
    assert!(packer.pack_one().await.unwrap());
    assert_eq!(
        catalog.get_shard_state(&shard_name).await.unwrap(),
        Some(ShardState::Packed)
    );

    let manager = ImageManager::new(
        "test-host".to_string(),
        catalog.clone(),
        image_pool.clone(),
        false,
    );
    let cancellation = tokio_util::sync::CancellationToken::new();
    manager.run_loop(&cancellation, true).await.unwrap();
    assert_eq!(
        image_pool.image_mapped(&shard_name).await.unwrap(),
        Some(MapMode::ReadOnly)
    );

    let cleaner = RwShardCleaner::new(catalog.clone());
    assert!(cleaner.clean_one(1).await.unwrap());
    assert_eq!(
        catalog.get_shard_state(&shard_name).await.unwrap(),
        Some(ShardState::Readonly)
    );

    let reader = Reader::new(
        catalog.clone(),
        image_pool.clone(),
        throttler.clone(),
        stats.clone(),
        4,
    );
    assert_eq!(&reader.get(&keep).await.unwrap()[..], b"keep me around");

    catalog.delete(&remove.sha256).await.unwrap();
    let deleted_cleaner = DeletedObjectsCleaner::new(catalog.clone(), image_pool.clone());
    let cleanup_cancellation = tokio_util::sync::CancellationToken::new();
    let cleaned = deleted_cleaner.run_once(&cleanup_cancellation).await.unwrap();
    assert_eq!(cleaned, 1);

    assert!(matches!(reader.get(&remove).await, Err(winery::Error::NotFound)));
    // the still-present object must survive the punch untouched
    assert_eq!(&reader.get(&keep).await.unwrap()[..], b"keep me around");
}
