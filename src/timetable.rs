// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use gtfs_structures::Gtfs;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CACHE_FILE_NAME: &str = "gtfs_static.zip";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TimetableError {
    #[error("timetable download failed and no cached archive exists: {0}")]
    Unavailable(reqwest::Error),
    #[error("could not parse timetable archive: {0}")]
    Parse(#[from] gtfs_structures::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn cache_file_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(CACHE_FILE_NAME)
}

fn cache_age(path: &Path) -> Option<Duration> {
    fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}

pub fn cache_is_fresh(path: &Path, max_age_hours: u64) -> bool {
    match cache_age(path) {
        Some(age) => age < Duration::from_secs(max_age_hours * 3600),
        None => false,
    }
}

/// Load the static timetable, downloading at most once per cache window.
///
/// A fresh-enough cached archive skips the network entirely. A failed
/// download falls back to whatever cached copy exists, however old, and
/// only the combination of a failed download with no cache at all is an
/// error. The cache file is overwritten on every successful download.
pub async fn load_timetable(
    client: &reqwest::Client,
    url: &str,
    cache_dir: &Path,
    max_age_hours: u64,
) -> Result<Gtfs, TimetableError> {
    fs::create_dir_all(cache_dir)?;
    let cache_file = cache_file_path(cache_dir);

    if cache_is_fresh(&cache_file, max_age_hours) {
        let age_hours = cache_age(&cache_file)
            .map(|age| age.as_secs() / 3600)
            .unwrap_or(0);
        println!("Using cached timetable archive (age: {}h)", age_hours);
        return parse_archive(&cache_file);
    }

    match download_archive(client, url).await {
        Ok(body) => {
            fs::write(&cache_file, &body)?;
            println!("Cached timetable archive ({} KB)", body.len() / 1024);
            parse_archive(&cache_file)
        }
        Err(fetch_err) => {
            //stale cache is acceptable, total absence is not
            if cache_file.exists() {
                let age_hours = cache_age(&cache_file)
                    .map(|age| age.as_secs() / 3600)
                    .unwrap_or(0);
                eprintln!(
                    "Timetable download failed ({}), using stale cache (age: {}h)",
                    fetch_err, age_hours
                );
                parse_archive(&cache_file)
            } else {
                Err(TimetableError::Unavailable(fetch_err))
            }
        }
    }
}

async fn download_archive(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    println!("Downloading timetable archive: {}", url);

    let response = client
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let body = response.bytes().await?;
    Ok(body.to_vec())
}

fn parse_archive(path: &Path) -> Result<Gtfs, TimetableError> {
    let gtfs = Gtfs::from_path(path.to_string_lossy().as_ref())?;
    Ok(gtfs)
}
