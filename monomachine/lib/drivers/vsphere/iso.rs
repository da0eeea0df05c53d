//! Fetching the boot2docker ISO into a machine directory.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio::{fs, io::AsyncWriteExt};

use crate::{MachineError, MachineResult};

use super::ISO_FILENAME;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Where the latest boot2docker release is downloaded from.
pub const DEFAULT_BOOT2DOCKER_URL: &str =
    "https://github.com/boot2docker/boot2docker/releases/latest/download/boot2docker.iso";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Places the boot2docker ISO at `destination`.
///
/// `url` may be an `http(s)://` URL, a `file://` URL or a local path. With an empty `url` the
/// cached ISO in `cache_dir` is used, downloading the latest release into the cache first when it
/// is missing.
pub async fn copy_iso_to_machine_dir(
    url: &str,
    cache_dir: &Path,
    destination: &Path,
) -> MachineResult<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }

    if url.is_empty() {
        let cached = cache_dir.join(ISO_FILENAME);
        if !fs::try_exists(&cached).await? {
            fs::create_dir_all(cache_dir).await?;
            download(DEFAULT_BOOT2DOCKER_URL, &cached).await?;
        }

        tracing::info!("copying cached {} to {}", cached.display(), destination.display());
        fs::copy(&cached, destination).await?;
        return Ok(());
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        return download(url, destination).await;
    }

    let source = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
    if !fs::try_exists(&source).await? {
        return Err(MachineError::InvalidConfig(format!(
            "boot2docker ISO not found: {}",
            source.display()
        )));
    }

    tracing::info!("copying {} to {}", source.display(), destination.display());
    fs::copy(&source, destination).await?;
    Ok(())
}

async fn download(url: &str, destination: &Path) -> MachineResult<()> {
    tracing::info!("downloading {url}");

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
    let client = ClientBuilder::new(Client::new())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

    let response = client.get(url).send().await?.error_for_status()?;

    // Stream into a temporary file so an interrupted download never looks complete.
    let partial = destination.with_extension("iso.part");
    let mut file = fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    while let Some(bytes) = stream.next().await {
        file.write_all(&bytes?).await?;
    }
    file.flush().await?;
    fs::rename(&partial, destination).await?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
