//! Tertiary model source: a zipped model directory behind a share link.
//!
//! The archive is streamed to a temporary file next to the extraction target
//! and unpacked from disk.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::embedding::{EmbeddingError, EmbeddingResult};

const ARCHIVE_SOURCE: &str = "model archive";

fn drive_file_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^/file/d/([^/]+)").expect("valid drive path pattern"))
}

fn archive_error(reason: impl Into<String>) -> EmbeddingError {
    EmbeddingError::LoadFailed {
        source_name: ARCHIVE_SOURCE.to_string(),
        reason: reason.into(),
    }
}

/// Turns a Google Drive share link into a direct download link.
///
/// Any other URL is returned unchanged.
pub fn direct_download_url(link: &str) -> EmbeddingResult<Url> {
    let url = Url::parse(link).map_err(|error| archive_error(format!("bad URL {link}: {error}")))?;
    if url.host_str() != Some("drive.google.com") {
        return Ok(url);
    }

    let file_id = drive_file_id_pattern()
        .captures(url.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            url.query_pairs()
                .find(|(key, _)| key == "id")
                .map(|(_, value)| value.into_owned())
        });

    match file_id {
        Some(id) => {
            let mut direct = Url::parse("https://drive.google.com/uc")
                .map_err(|error| archive_error(error.to_string()))?;
            direct
                .query_pairs_mut()
                .append_pair("export", "download")
                .append_pair("id", &id)
                .append_pair("confirm", "t");
            Ok(direct)
        }
        None => Ok(url),
    }
}

/// Downloads the archive at `link`, unpacks it into `target` and returns the
/// directory holding the model files.
pub async fn fetch_archive(link: &str, target: &Path, timeout: Duration) -> EmbeddingResult<PathBuf> {
    let url = direct_download_url(link)?;
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| archive_error(error.to_string()))?;

    let mut response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|error| archive_error(format!("download of {url} failed: {error}")))?;
    if !response.status().is_success() {
        return Err(archive_error(format!(
            "download of {url} returned {}",
            response.status()
        )));
    }

    let parent = target
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|error| archive_error(format!("cannot create {}: {error}", parent.display())))?;
    let download = tempfile::NamedTempFile::new_in(parent)
        .map_err(|error| archive_error(format!("cannot create download file: {error}")))?;
    let handle = download
        .reopen()
        .map_err(|error| archive_error(format!("cannot open download file: {error}")))?;
    let mut file = tokio::fs::File::from_std(handle);

    let mut received = 0_u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|error| archive_error(format!("download of {url} failed: {error}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|error| archive_error(format!("cannot write download file: {error}")))?;
        received += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|error| archive_error(format!("cannot write download file: {error}")))?;
    drop(file);
    log::info!("Downloaded {received} bytes of model archive");

    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> EmbeddingResult<PathBuf> {
        let archive = download
            .reopen()
            .map_err(|error| archive_error(format!("cannot open download file: {error}")))?;
        extract_archive(archive, &target)?;
        locate_model_dir(&target)
    })
    .await
    .map_err(|error| archive_error(error.to_string()))?
}

/// Replaces `target` with the contents of the zip read from `reader`.
pub(crate) fn extract_archive<R: Read + Seek>(reader: R, target: &Path) -> EmbeddingResult<()> {
    if target.exists() {
        std::fs::remove_dir_all(target)
            .map_err(|error| archive_error(format!("cannot clear {}: {error}", target.display())))?;
    }
    std::fs::create_dir_all(target)
        .map_err(|error| archive_error(format!("cannot create {}: {error}", target.display())))?;

    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|error| archive_error(format!("not a zip archive: {error}")))?;
    archive
        .extract(target)
        .map_err(|error| archive_error(format!("cannot unpack archive: {error}")))
}

/// The archive root when it holds the tokenizer, otherwise its only
/// subdirectory that does.
pub(crate) fn locate_model_dir(root: &Path) -> EmbeddingResult<PathBuf> {
    if root.join("tokenizer.json").is_file() {
        return Ok(root.to_path_buf());
    }

    let entries = std::fs::read_dir(root)
        .map_err(|error| archive_error(format!("cannot read {}: {error}", root.display())))?;
    let nested: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir() && path.join("tokenizer.json").is_file())
        .collect();

    match nested.as_slice() {
        [dir] => Ok(dir.clone()),
        [] => Err(archive_error("archive contains no model directory")),
        _ => Err(archive_error("archive contains several model directories")),
    }
}
