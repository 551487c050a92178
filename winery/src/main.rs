use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};
use winery_config::{Config, LogFormat, ShardsPool};

use winery::catalog::Catalog;
use winery::cleaner::RwShardCleaner;
use winery::cli::{Cli, Commands};
use winery::deleted_objects::DeletedObjectsCleaner;
use winery::image_manager::ImageManager;
use winery::packer::Packer;
use winery::pool::directory::DirectoryPool;
use winery::pool::rbd::RbdPool;
use winery::pool::ImagePool;
use winery::throttler::{NoopThrottler, SyncedThrottler, Throttler};

fn init_logging(logging: &winery_config::Logging) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(&logging.filter);

    match logging.format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
    }
}

fn build_pool(config: &Config) -> Arc<dyn ImagePool> {
    match &config.shards_pool {
        ShardsPool::Directory { base_directory } => {
            Arc::new(DirectoryPool::new(base_directory.clone(), config.shards.max_size))
        }
        ShardsPool::Rbd {
            pool_name,
            data_pool_name,
            image_features_unsupported,
            map_options,
            use_sudo,
        } => Arc::new(RbdPool::new(
            pool_name.clone(),
            data_pool_name.clone(),
            image_features_unsupported.clone(),
            map_options.clone(),
            *use_sudo,
            config.shards.max_size,
        )),
    }
}

async fn build_throttler(
    config: &Config,
    catalog: &Catalog,
) -> Result<Arc<dyn Throttler>, winery::error::Error> {
    let Some(throttler_config) = &config.throttler else {
        return Ok(Arc::new(NoopThrottler));
    };

    // `throttler.db` lets an operator point the throttler at a dedicated
    // database; absent that, it rides on the catalog's own pool.
    let pool = match &throttler_config.db {
        Some(dsn) => sqlx::PgPool::connect(dsn).await.map_err(winery::catalog::Error::from)?,
        None => catalog.pool(),
    };
    Ok(Arc::new(SyncedThrottler::connect(pool, throttler_config).await?))
}

async fn cancellation_on_signals() -> CancellationToken {
    let token = CancellationToken::new();

    #[cfg(unix)]
    {
        let token = token.clone();
        tokio::spawn(async move {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(sig) => sig,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }

            tracing::info!("shutdown requested");
            token.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        let token = token.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            token.cancel();
        });
    }

    token
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Configcheck) {
        return match Config::load(&cli.config_file) {
            Ok(_) => {
                println!("configuration OK");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let config = match Config::load(&cli.config_file) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging);

    if let Err(e) = run(config, cli.command).await {
        tracing::error!(error = %e, "fatal error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(config: Config, command: Commands) -> Result<(), winery::error::Error> {
    let catalog = Catalog::connect(&config.database).await?;
    catalog.migrate().await?;

    let pool = build_pool(&config);
    let cancellation = cancellation_on_signals().await;

    match command {
        Commands::Configcheck => unreachable!("handled before connecting"),

        Commands::Packer {
            stop_after_shards,
            only_shard,
        } => {
            let throttler = build_throttler(&config, &catalog).await?;
            let packer = Packer::new(catalog, pool, throttler, config.packer);

            match only_shard {
                Some(name) => packer.pack_named(&name).await?,
                None => packer.run_loop(&cancellation, stop_after_shards).await?,
            }
        }

        Commands::Rbd {
            stop_instead_of_waiting,
            manage_rw_images,
        } => {
            let hostname = hostname_string();
            let manager = ImageManager::new(hostname, catalog, pool, manage_rw_images);
            manager.run_loop(&cancellation, stop_instead_of_waiting).await?;
        }

        Commands::RwShardCleaner {
            stop_after_shards,
            stop_instead_of_waiting,
            min_mapped_hosts,
        } => {
            let cleaner = RwShardCleaner::new(catalog);
            cleaner
                .run_loop(&cancellation, stop_after_shards, stop_instead_of_waiting, min_mapped_hosts)
                .await?;
        }

        Commands::CleanDeletedObjects => {
            let cleaner = DeletedObjectsCleaner::new(catalog, pool);
            let cleaned = cleaner.run_once(&cancellation).await?;
            tracing::info!(cleaned, "deleted-objects cleaner pass complete");
        }
    }

    Ok(())
}

fn hostname_string() -> String {
    hostname_from_env().unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(unix)]
fn hostname_from_env() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        let mut buf = [0u8; 256];
        let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if ret != 0 {
            return None;
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        std::str::from_utf8(&buf[..end]).ok().map(str::to_owned)
    })
}

#[cfg(not(unix))]
fn hostname_from_env() -> Option<String> {
    std::env::var("HOSTNAME").ok()
}
