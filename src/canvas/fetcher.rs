use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::canvas::sender::{ApiError, RequestSender};
use crate::canvas::tui;

/// Size of the copy buffer; the response body is never held in memory whole.
const CHUNK_SIZE: usize = 8 * 1024;

/// Errors raised while materializing a remote file on disk. Whenever one of
/// these is returned, no partial file remains at the destination.
#[derive(Error, Debug)]
pub(crate) enum DownloadError {
    #[error(transparent)]
    Request(#[from] ApiError),

    #[error("could not create {path:?}: {source}")]
    Disk { path: PathBuf, source: io::Error },

    #[error("transfer to {path:?} was interrupted: {source}")]
    Interrupted { path: PathBuf, source: io::Error },
}

/// Streams `url` to `dest`, overwriting from scratch. A byte progress bar
/// tracks the transfer against `expected_size`; the size is advisory and a
/// wrong or unknown value only degrades the bar, never the download.
pub(crate) fn download(
    sender: &RequestSender,
    url: &str,
    dest: &Path,
    expected_size: Option<u64>,
) -> Result<(), DownloadError> {
    let response = sender.stream(url)?;

    let display_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bar = tui::byte_progress_bar(expected_size, &display_name);

    let result = write_stream(bar.wrap_read(response), dest);
    bar.finish_and_clear();
    result
}

/// Streams a reader into `dest` through a bounded buffer. On any failure the
/// partial file is removed before the error returns, so leftovers never
/// satisfy a later existence probe.
fn write_stream(mut reader: impl Read, dest: &Path) -> Result<(), DownloadError> {
    let result = copy_to_file(&mut reader, dest);
    if result.is_err() {
        discard_partial(dest);
    }
    result
}

fn copy_to_file(reader: &mut impl Read, dest: &Path) -> Result<(), DownloadError> {
    let mut file = File::create(dest).map_err(|source| DownloadError::Disk {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|source| DownloadError::Interrupted {
                path: dest.to_path_buf(),
                source,
            })?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(|source| DownloadError::Interrupted {
                path: dest.to_path_buf(),
                source,
            })?;
    }

    file.flush().map_err(|source| DownloadError::Interrupted {
        path: dest.to_path_buf(),
        source,
    })
}

fn discard_partial(dest: &Path) {
    if dest.exists() {
        if let Err(err) = fs::remove_file(dest) {
            warn!("Could not remove partial file {:?}: {}", dest, err);
        }
    }
}
