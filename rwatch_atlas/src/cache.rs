//! On-disk cache for historical measurement downloads.
//!
//! Each measurement is cached as one file of newline-delimited result
//! objects under the configured cache directory. History collection always
//! lands in the cache first and is replayed from disk through the parsing
//! pool, so the parse path is identical for fresh and cached data.

use crate::measurement::TracerouteResult;
use crate::results_stream::{download_results_to_file, results_url, stream_results_from_file};
use crate::AtlasError;
use rwatch_config::{CACHE_DIR, CACHE_DURATION, STATISTICS_PERIOD};
use rwatch_utils::unix_time::unix_now;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::info;

fn cache_dir() -> Result<PathBuf, AtlasError> {
    let path = PathBuf::from(CACHE_DIR.as_str());

    match std::fs::metadata(&path) {
        Ok(stat) if stat.is_dir() => Ok(path),
        Ok(_) => Err(AtlasError::Io(std::io::Error::other(
            "cache path is not a directory",
        ))),
        Err(_) => {
            std::fs::create_dir_all(&path)?;
            Ok(path)
        }
    }
}

fn cache_file(measurement_id: u64) -> Result<PathBuf, AtlasError> {
    Ok(cache_dir()?.join(format!("{measurement_id}.ndjson")))
}

async fn update_cache_file(measurement_id: u64, file: &PathBuf) -> Result<(), AtlasError> {
    let start = unix_now().map_err(|_| {
        AtlasError::Io(std::io::Error::other("system clock unavailable"))
    })? - STATISTICS_PERIOD.as_secs() as i64;

    let url = results_url(measurement_id, Some(start), None, None);
    download_results_to_file(&url, file).await
}

/// Download one statistics-period of results for a measurement and return a
/// stream of parsed results. The download is written through the cache, so
/// a subsequent cached read sees the fresh data.
pub async fn fresh_history_results(
    measurement_id: u64,
) -> Result<mpsc::Receiver<TracerouteResult>, AtlasError> {
    let file = cache_file(measurement_id)?;
    update_cache_file(measurement_id, &file).await?;
    stream_results_from_file(&file)
}

/// Like [`fresh_history_results`], but reuses an existing cache file if it
/// is younger than the configured cache duration.
pub async fn cached_history_results(
    measurement_id: u64,
) -> Result<mpsc::Receiver<TracerouteResult>, AtlasError> {
    let file = cache_file(measurement_id)?;

    let fresh_enough = std::fs::metadata(&file)
        .and_then(|stat| stat.modified())
        .map(|modified| modified + *CACHE_DURATION > SystemTime::now())
        .unwrap_or(false);

    if !fresh_enough {
        info!("Refreshing cache entry for measurement {measurement_id}");
        update_cache_file(measurement_id, &file).await?;
    }

    stream_results_from_file(&file)
}
