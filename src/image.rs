//! Sandbox Image Builder (C2).
//!
//! The worker build context (`Dockerfile` + in-sandbox executor) is embedded
//! into this binary at compile time and extracted to a cache directory on
//! first use, the same embed-then-extract trick the teacher used for
//! bundled provider scripts. From there it is streamed to the Docker daemon
//! as a tar archive and built once at startup. Failure here is fatal: the
//! service cannot run without the image.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use bollard::Docker;
use bollard::image::BuildImageOptions;
use futures::StreamExt;
use include_dir::{Dir, include_dir};

/// Fixed tag the built image is always retagged to. Rebuilding across
/// restarts is acceptable; the tag keeps referencing exactly one image.
pub const WORKER_IMAGE_TAG: &str = "sandbox-runner-worker:latest";

static WORKER_CONTEXT: Dir = include_dir!("$CARGO_MANIFEST_DIR/worker");

static CACHE_DIR: OnceLock<Result<PathBuf, ImageError>> = OnceLock::new();

/// Errors that can occur while building the sandbox image.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to create build-context cache directory: {0}")]
    CacheDir(std::io::Error),

    #[error("failed to extract embedded build context: {0}")]
    Extract(std::io::Error),

    #[error("failed to archive build context: {0}")]
    Archive(std::io::Error),

    #[error("docker build failed: {0}")]
    Build(#[from] bollard::errors::Error),

    #[error("docker build failed: {0}")]
    BuildStream(String),
}

fn get_cache_dir() -> Result<PathBuf, ImageError> {
    let result = CACHE_DIR.get_or_init(|| {
        let base = env::var("XDG_CACHE_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| env::var("HOME").ok().map(|h| PathBuf::from(h).join(".cache")))
            .unwrap_or_else(|| PathBuf::from("/tmp"));

        let dir = base.join("sandbox-runner").join("worker-context");
        fs::create_dir_all(&dir).map_err(ImageError::CacheDir)?;

        for file in WORKER_CONTEXT.files() {
            let target = dir.join(file.path());
            if target.exists()
                && let Ok(existing) = fs::read(&target)
                && existing == file.contents()
            {
                continue;
            }
            fs::write(&target, file.contents()).map_err(ImageError::Extract)?;
        }

        Ok(dir)
    });

    match result {
        Ok(path) => Ok(path.clone()),
        Err(e) => Err(ImageError::CacheDir(std::io::Error::other(e.to_string()))),
    }
}

fn build_context_tar(dir: &PathBuf) -> Result<Vec<u8>, ImageError> {
    let mut archive = tar::Builder::new(Vec::new());
    archive
        .append_dir_all(".", dir)
        .map_err(ImageError::Archive)?;
    archive.into_inner().map_err(ImageError::Archive)
}

/// Builds (or rebuilds) the worker image from the embedded context and
/// tags it [`WORKER_IMAGE_TAG`].
pub async fn build_worker_image(docker: &Docker) -> Result<(), ImageError> {
    let context_dir = get_cache_dir()?;
    let tar = build_context_tar(&context_dir)?;

    let options = BuildImageOptions {
        dockerfile: "Dockerfile",
        t: WORKER_IMAGE_TAG,
        rm: true,
        forcerm: true,
        ..Default::default()
    };

    let mut stream = docker.build_image(options, None, Some(tar.into()));
    while let Some(chunk) = stream.next().await {
        let info = chunk?;
        if let Some(error) = info.error {
            return Err(ImageError::BuildStream(error));
        }
    }

    Ok(())
}
