use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;
use std::{env, fs};

use anyhow::Context;
use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::canvas::io::directory::{ArchiveTarget, DOCUMENT_EXTENSION};
use crate::canvas::tui;

/// Environment variable that overrides converter discovery entirely.
const CONVERTER_PATH_VAR: &str = "SOFFICE_PATH";

/// Binary names probed on PATH, in order.
const CONVERTER_BINARIES: [&str; 2] = ["soffice", "libreoffice"];

/// Pinned portable build fetched once per run when no system converter
/// exists anywhere.
const CONVERTER_BOOTSTRAP_URL: &str =
    "https://libreoffice.soluzioniopen.com/stable/standard/LibreOffice-fresh.standard-x86_64.AppImage";

/// Filename the portable build is stored under inside the tools directory.
const CONVERTER_BOOTSTRAP_NAME: &str = "libreoffice.AppImage";

/// The resolved converter binary, or the reason none could be acquired.
/// Resolution (including the bootstrap download) runs at most once per
/// process, and stays safe if conversions ever run concurrently.
static CONVERTER: OnceCell<Result<PathBuf, String>> = OnceCell::new();

/// Errors raised while converting a document into the durable format. The
/// source document is always left in place.
#[derive(Error, Debug)]
pub(crate) enum ConvertError {
    #[error("no usable document converter: {0}")]
    Unavailable(String),

    #[error("converter exited with {status} for {path:?}: {stderr}")]
    Failed {
        path: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("converter reported success but produced no output for {0:?}")]
    MissingOutput(PathBuf),

    #[error("could not run converter: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while rendering a remote page into a document.
#[derive(Error, Debug)]
pub(crate) enum RenderError {
    #[error("could not stage page markup at {path:?}: {source}")]
    Stage { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Renders a remote page into the durable document format at the target.
///
/// An empty or missing body is a silent no-op: no artifact, no error. The
/// title is injected as a heading ahead of the body markup, the combined
/// document is staged beside the target and converted, and the staged
/// markup is removed afterwards.
pub(crate) fn render_page(
    title: &str,
    body: Option<&str>,
    target: &ArchiveTarget,
    tools_dir: &Path,
) -> Result<Option<PathBuf>, RenderError> {
    let Some(body) = body.map(str::trim).filter(|body| !body.is_empty()) else {
        return Ok(None);
    };

    let staged = target.with_extension("html");
    fs::write(&staged, page_document(title, body)).map_err(|source| RenderError::Stage {
        path: staged.clone(),
        source,
    })?;

    let converted = convert_to_document(&staged, tools_dir);
    if let Err(err) = fs::remove_file(&staged) {
        warn!("Could not remove staged markup {:?}: {}", staged, err);
    }

    Ok(Some(converted?))
}

/// Converts a document (an office file or staged markup) into the durable
/// format, written alongside the source with the same base name. A failed
/// conversion leaves the source untouched.
pub(crate) fn convert_to_document(
    source: &Path,
    tools_dir: &Path,
) -> Result<PathBuf, ConvertError> {
    let converter = converter_binary(tools_dir)?;
    let outdir = source.parent().unwrap_or_else(|| Path::new("."));

    let output = Command::new(converter)
        .arg("--headless")
        .arg("--convert-to")
        .arg(DOCUMENT_EXTENSION)
        .arg("--outdir")
        .arg(outdir)
        .arg(source)
        .output()?;

    if !output.status.success() {
        return Err(ConvertError::Failed {
            path: source.to_path_buf(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let converted = source.with_extension(DOCUMENT_EXTENSION);
    if !converted.exists() {
        return Err(ConvertError::MissingOutput(source.to_path_buf()));
    }
    Ok(converted)
}

/// Wraps a page's title and body markup into a minimal standalone document.
fn page_document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n{body}\n</body>\n</html>\n",
        title = escape_markup(title),
        body = body,
    )
}

/// Escapes text destined for markup positions. The body itself is already
/// markup and is passed through untouched.
fn escape_markup(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Resolves the converter binary, acquiring one on first use if necessary.
fn converter_binary(tools_dir: &Path) -> Result<&'static Path, ConvertError> {
    let resolved =
        CONVERTER.get_or_init(|| resolve_converter(tools_dir).map_err(|err| err.to_string()));

    match resolved {
        Ok(path) => Ok(path.as_path()),
        Err(message) => Err(ConvertError::Unavailable(message.clone())),
    }
}

fn resolve_converter(tools_dir: &Path) -> anyhow::Result<PathBuf> {
    if let Ok(overridden) = env::var(CONVERTER_PATH_VAR) {
        let path = PathBuf::from(overridden);
        if path.exists() {
            trace!("Using converter from {}: {:?}", CONVERTER_PATH_VAR, path);
            return Ok(path);
        }
        warn!(
            "{} points at {:?}, which does not exist. Falling back to discovery.",
            CONVERTER_PATH_VAR, path
        );
    }

    for name in CONVERTER_BINARIES {
        if let Ok(path) = which::which(name) {
            trace!("Found document converter at {:?}", path);
            return Ok(path);
        }
    }

    info!("No document converter found on PATH. Fetching a portable build (one-time setup)...");
    bootstrap_converter(tools_dir)
}

/// Downloads the pinned portable converter into the tools directory and
/// marks it executable. Partial downloads are discarded, the same rule the
/// fetcher applies to archive artifacts.
fn bootstrap_converter(tools_dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(tools_dir)
        .with_context(|| format!("Failed to create tools directory at {:?}", tools_dir))?;
    let dest = tools_dir.join(CONVERTER_BOOTSTRAP_NAME);

    if !dest.exists() {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .use_rustls_tls()
            .build()
            .context("Failed to build bootstrap HTTP client")?;

        let response = client
            .get(CONVERTER_BOOTSTRAP_URL)
            .send()
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Failed to fetch {}", CONVERTER_BOOTSTRAP_URL))?;

        let bar = tui::byte_progress_bar(response.content_length(), CONVERTER_BOOTSTRAP_NAME);
        let mut reader = bar.wrap_read(response);
        let mut file = fs::File::create(&dest)
            .with_context(|| format!("Failed to create {:?}", dest))?;
        let copied = io::copy(&mut reader, &mut file);
        bar.finish_and_clear();

        if let Err(err) = copied {
            if let Err(cleanup) = fs::remove_file(&dest) {
                warn!("Could not remove partial converter {:?}: {}", dest, cleanup);
            }
            return Err(err).with_context(|| format!("Transfer of {} failed", CONVERTER_BOOTSTRAP_URL));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to mark {:?} executable", dest))?;
    }

    info!("Document converter ready at {:?}", dest);
    Ok(dest)
}
