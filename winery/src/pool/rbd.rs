//! Ceph RBD-backed image pool: one block device per shard, mapped under
//! `/dev/rbd/<pool>/<name>`. Every operation shells out to the `rbd` CLI.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{Error, ImagePool, MapMode};

pub struct RbdPool {
    pool_name: String,
    data_pool_name: Option<String>,
    image_features_unsupported: Vec<String>,
    map_options: Option<String>,
    use_sudo: bool,
    image_size: u64,
}

impl RbdPool {
    pub fn new(
        pool_name: impl Into<String>,
        data_pool_name: Option<String>,
        image_features_unsupported: Vec<String>,
        map_options: Option<String>,
        use_sudo: bool,
        shard_max_size: u64,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            data_pool_name,
            image_features_unsupported,
            map_options,
            use_sudo,
            image_size: super::directory::image_size_bytes(shard_max_size),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg("rbd");
            c
        } else {
            Command::new("rbd")
        };
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, Error> {
        let output = self.command(args).output().await?;
        debug!(?args, status = ?output.status, "rbd command");
        Ok(output)
    }

    async fn run_checked(&self, args: &[&str]) -> Result<std::process::Output, Error> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(Error::Command(
                format!("rbd {}", args.join(" ")),
                output.status,
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(output)
    }
}

#[async_trait]
impl ImagePool for RbdPool {
    async fn image_exists(&self, name: &str) -> Result<bool, Error> {
        let spec = format!("{}/{}", self.pool_name, name);
        let output = self.run(&["info", &spec]).await?;
        Ok(output.status.success())
    }

    async fn image_mapped(&self, name: &str) -> Result<Option<MapMode>, Error> {
        let path = self.image_path(name);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mode = metadata.permissions().mode() & 0o200;
        Ok(if mode != 0 {
            Some(MapMode::ReadWrite)
        } else {
            Some(MapMode::ReadOnly)
        })
    }

    async fn image_list(&self) -> Result<Vec<String>, Error> {
        let output = self.run_checked(&["ls", &self.pool_name]).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn image_path(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("/dev/rbd/{}/{}", self.pool_name, name))
    }

    async fn image_create(&self, name: &str) -> Result<(), Error> {
        let spec = format!("{}/{}", self.pool_name, name);
        let size_arg = format!("--size={}", self.image_size);

        let mut args = vec!["create".to_string(), size_arg, spec.clone()];
        if let Some(data_pool) = &self.data_pool_name {
            args.push(format!("--data-pool={}", data_pool));
        }
        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&args_refs).await?;

        for feature in &self.image_features_unsupported {
            self.run_checked(&["feature", "disable", &spec, feature])
                .await?;
        }

        self.image_map(name, MapMode::ReadWrite).await
    }

    async fn image_map(&self, name: &str, mode: MapMode) -> Result<(), Error> {
        let spec = format!("{}/{}", self.pool_name, name);

        let mut opts = vec![mode.as_str().to_string()];
        if let Some(extra) = &self.map_options {
            opts.push(extra.clone());
        }
        let opt_arg = format!("-o{}", opts.join(","));

        self.run_checked(&["device", "map", &opt_arg, &spec]).await?;
        Ok(())
    }

    async fn image_unmap(&self, name: &str) -> Result<(), Error> {
        let path = self.image_path(name);
        let path_str = path.to_string_lossy().into_owned();

        let output = self.run(&["device", "unmap", &path_str]).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not mapped") {
            return Err(Error::ShardNotMapped(name.to_string()));
        }

        Err(Error::Command(
            format!("rbd device unmap {}", path_str),
            output.status,
            stderr.into_owned(),
        ))
    }
}
