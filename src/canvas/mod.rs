use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::canvas::io::Config;
use crate::canvas::io::directory::{ArchiveTarget, DirectoryManager, requires_conversion};
use crate::canvas::sender::RequestSender;
use crate::canvas::sender::entries::{ItemKind, ModuleEntry, ModuleItemEntry};

pub(crate) mod fetcher;
pub(crate) mod io;
pub(crate) mod renderer;
pub(crate) mod sender;
pub(crate) mod tui;

/// Tallies of every item outcome across a run. The run always ends with
/// these, no matter how many items failed along the way.
#[derive(Debug, Default, Clone)]
pub(crate) struct RunSummary {
    pub(crate) archived: usize,
    pub(crate) skipped: usize,
    pub(crate) failed: usize,
    pub(crate) warnings: usize,
}

/// Terminal state of a single item.
enum ItemOutcome {
    Archived,
    /// Archived, but a follow-up step (conversion) failed and only the
    /// original source was kept.
    ArchivedWithWarning,
    Skipped,
    Failed,
}

/// Walks the authenticated user's courses → modules → items and materializes
/// each item under the archive root, strictly sequentially. All failure
/// isolation lives here: item errors never abort the module, module and
/// course access errors never abort the run.
pub(crate) struct CanvasArchiver {
    /// The sender used for all API calls.
    request_sender: RequestSender,
    /// Manages the directory tree artifacts are written into.
    directories: DirectoryManager,
    /// Outcome tallies for the final summary.
    summary: RunSummary,
}

impl CanvasArchiver {
    /// Creates the archiver, making sure the archive root exists.
    pub(crate) fn new(request_sender: RequestSender, config: &Config) -> Result<Self> {
        let directories = DirectoryManager::new(config.output_dir())?;

        Ok(CanvasArchiver {
            request_sender,
            directories,
            summary: RunSummary::default(),
        })
    }

    /// Archives every active course. Only the initial course listing can
    /// fail the run; everything below it degrades to warnings.
    pub(crate) fn archive_all(&mut self) -> Result<RunSummary> {
        let courses = self
            .request_sender
            .active_courses()
            .context("Could not list enrolled courses")?;
        info!("Found {} active courses.", courses.len());

        for course in &courses {
            let Some(course_name) = course.name.as_deref() else {
                warn!(
                    "Skipping course {} with a restricted or missing name.",
                    course.id
                );
                self.summary.warnings += 1;
                continue;
            };

            info!(
                "Archiving {}...",
                console::style(format!("\"{course_name}\""))
                    .color256(39)
                    .italic()
            );
            if let Err(err) = self.archive_course(course.id, course_name) {
                self.summary.warnings += 1;
                warn!(
                    "Issue accessing modules for \"{}\": {}. Skipping course.",
                    course_name, err
                );
            }
        }

        Ok(self.summary.clone())
    }

    /// Archives one course's modules. A module listing error abandons the
    /// course; a single module's error abandons only that module.
    fn archive_course(&mut self, course_id: i64, course_name: &str) -> Result<()> {
        let modules = self.request_sender.modules(course_id)?;

        for module in &modules {
            if let Err(err) = self.archive_module(course_id, course_name, module) {
                self.summary.warnings += 1;
                warn!(
                    "Issue accessing items for \"{}\": {}. Skipping module.",
                    module.name, err
                );
            }
        }
        Ok(())
    }

    /// Archives one module's items, in remote listing order.
    fn archive_module(
        &mut self,
        course_id: i64,
        course_name: &str,
        module: &ModuleEntry,
    ) -> Result<()> {
        let module_dir =
            self.directories
                .module_dir(course_id, course_name, module.id, &module.name)?;
        let items = self.request_sender.module_items(course_id, module.id)?;
        trace!(
            "Module \"{}\" lists {} items...",
            module.name,
            items.len()
        );

        for item in &items {
            let outcome = self.archive_item(course_id, &module_dir, item);
            match outcome {
                ItemOutcome::Archived => self.summary.archived += 1,
                ItemOutcome::ArchivedWithWarning => {
                    self.summary.archived += 1;
                    self.summary.warnings += 1;
                }
                ItemOutcome::Skipped => self.summary.skipped += 1,
                ItemOutcome::Failed => self.summary.failed += 1,
            }
        }
        Ok(())
    }

    /// Dispatches one item on its kind. Every failure is absorbed here; the
    /// returned outcome is the only thing that escapes.
    fn archive_item(
        &mut self,
        course_id: i64,
        module_dir: &Path,
        item: &ModuleItemEntry,
    ) -> ItemOutcome {
        let target = ArchiveTarget::new(module_dir, &item.title, item.id);

        match item.kind {
            ItemKind::File => self.archive_file(course_id, &target, item),
            ItemKind::Page => self.archive_page(course_id, &target, item),
            ItemKind::ExternalUrl => self.archive_link(&target, item),
            ItemKind::Other => {
                trace!("Ignoring unsupported item \"{}\"...", item.title);
                ItemOutcome::Skipped
            }
        }
    }

    /// Files: probe, fetch, and convert office formats to the durable
    /// document. A conversion failure keeps the downloaded source.
    fn archive_file(
        &mut self,
        course_id: i64,
        target: &ArchiveTarget,
        item: &ModuleItemEntry,
    ) -> ItemOutcome {
        let Some(file_id) = item.content_id else {
            error!("[FAIL] File item \"{}\" has no content reference.", item.title);
            return ItemOutcome::Failed;
        };

        let file = match self.request_sender.file(course_id, file_id) {
            Ok(file) => file,
            Err(err) => {
                error!("[FAIL] Access denied to file \"{}\": {}", item.title, err);
                return ItemOutcome::Failed;
            }
        };
        trace!(
            "File {} resolves to \"{}\" ({})...",
            file.id,
            file.filename,
            file.size
                .map_or_else(|| "unknown size".to_string(), format_file_size)
        );
        let extension = Path::new(&file.filename)
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or("")
            .to_string();

        // An office source left behind by an earlier run only needs its
        // conversion re-attempted, not a re-download.
        if target.needs_conversion_only(&extension) {
            return self.convert_artifact(&target.with_extension(&extension));
        }
        if target.file_exists(&extension) {
            info!("[SKIP] Already archived: \"{}\"", target.stem());
            return ItemOutcome::Skipped;
        }

        let dest = target.with_extension(&extension);
        if let Err(err) = fetcher::download(&self.request_sender, &file.url, &dest, file.size) {
            error!("[FAIL] Download failed for \"{}\": {}", item.title, err);
            return ItemOutcome::Failed;
        }
        let size_on_disk = fs::metadata(&dest).map(|meta| meta.len()).unwrap_or_default();
        info!(
            "[FILE] Saved {} ({})",
            console::style(format!("\"{}\"", file_label(&dest)))
                .color256(39)
                .italic(),
            format_file_size(size_on_disk)
        );

        if requires_conversion(&extension) {
            return self.convert_artifact(&dest);
        }
        ItemOutcome::Archived
    }

    /// Pages: probe, fetch the body, render to the durable document. An
    /// empty body is a silent skip rather than a failure.
    fn archive_page(
        &mut self,
        course_id: i64,
        target: &ArchiveTarget,
        item: &ModuleItemEntry,
    ) -> ItemOutcome {
        let Some(page_url) = item.page_url.as_deref() else {
            error!("[FAIL] Page item \"{}\" has no slug.", item.title);
            return ItemOutcome::Failed;
        };

        if target.page_exists() {
            info!("[SKIP] Already archived: \"{}\"", target.stem());
            return ItemOutcome::Skipped;
        }

        let page = match self.request_sender.page(course_id, page_url) {
            Ok(page) => page,
            Err(err) => {
                error!("[FAIL] Access denied to page \"{}\": {}", item.title, err);
                return ItemOutcome::Failed;
            }
        };
        let title = page.title.as_deref().unwrap_or(&item.title);

        match renderer::render_page(
            title,
            page.body.as_deref(),
            target,
            &self.directories.tools_dir(),
        ) {
            Ok(Some(rendered)) => {
                info!(
                    "[PAGE] Rendered {}",
                    console::style(format!("\"{}\"", file_label(&rendered)))
                        .color256(39)
                        .italic()
                );
                ItemOutcome::Archived
            }
            Ok(None) => {
                trace!("Page \"{}\" has no content, skipping...", title);
                ItemOutcome::Skipped
            }
            Err(err) => {
                error!("[FAIL] Could not render page \"{}\": {}", title, err);
                ItemOutcome::Failed
            }
        }
    }

    /// External URLs: write a shortcut artifact unconditionally. The write
    /// is cheap and idempotent, so no probe is involved.
    fn archive_link(&self, target: &ArchiveTarget, item: &ModuleItemEntry) -> ItemOutcome {
        let Some(url) = item.external_url.as_deref() else {
            error!("[FAIL] Link item \"{}\" has no URL.", item.title);
            return ItemOutcome::Failed;
        };

        let dest = target.shortcut_path();
        // The .url format is openable as a shortcut on Windows and macOS.
        match fs::write(&dest, format!("[InternetShortcut]\nURL={url}\n")) {
            Ok(()) => {
                info!("[LINK] Saved shortcut \"{}\"", file_label(&dest));
                ItemOutcome::Archived
            }
            Err(err) => {
                error!("[FAIL] Could not write shortcut {:?}: {}", dest, err);
                ItemOutcome::Failed
            }
        }
    }

    /// Converts an office artifact in place; failure keeps the source as
    /// the best-effort archived artifact.
    fn convert_artifact(&self, source: &Path) -> ItemOutcome {
        match renderer::convert_to_document(source, &self.directories.tools_dir()) {
            Ok(converted) => {
                info!(
                    "[DOC] Converted {}",
                    console::style(format!("\"{}\"", file_label(&converted)))
                        .color256(39)
                        .italic()
                );
                ItemOutcome::Archived
            }
            Err(err) => {
                warn!(
                    "[WARN] Conversion failed for {:?}: {}. Keeping the original.",
                    source, err
                );
                ItemOutcome::ArchivedWithWarning
            }
        }
    }
}

/// The file name of a path, for log lines.
fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Formats a byte count into a human-readable size with appropriate units.
fn format_file_size(size_bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size = size_bytes as f64;

    if size >= GB {
        format!("{:.2} GB", size / GB)
    } else if size >= MB {
        format!("{:.2} MB", size / MB)
    } else if size >= KB {
        format!("{:.2} KB", size / KB)
    } else {
        format!("{size_bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn archiver_config(server: &MockServer, root: &Path) -> Config {
        Config::from_parts(
            Some(server.base_url()),
            Some("test-token".to_string()),
            Some(root.to_string_lossy().into_owned()),
        )
        .expect("config")
    }

    /// Mocks two courses (the first fails at module listing), a nameless
    /// enrollment stub, and one module holding a downloadable file, an
    /// inaccessible file, an external link, an empty page, and an
    /// unsupported kind.
    fn mock_catalog(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses");
            then.status(200).json_body(json!([
                {"id": 1, "name": "History"},
                {"id": 2, "name": "Biology"},
                {"id": 3}
            ]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/1/modules");
            then.status(500);
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/2/modules");
            then.status(200).json_body(json!([{"id": 10, "name": "Week 1"}]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/2/modules/10/items");
            then.status(200).json_body(json!([
                {"id": 100, "title": "Syllabus notes", "type": "File", "content_id": 99},
                {"id": 101, "title": "Restricted scan", "type": "File", "content_id": 77},
                {"id": 102, "title": "Further reading", "type": "ExternalUrl", "external_url": "https://example.com/x"},
                {"id": 103, "title": "Placeholder", "type": "Page", "page_url": "placeholder"},
                {"id": 104, "title": "Quiz 1", "type": "Quiz"}
            ]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/2/files/99");
            then.status(200).json_body(json!({
                "id": 99,
                "filename": "notes.txt",
                "url": server.url("/files/99/download"),
                "size": 11
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/2/files/77");
            then.status(403);
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/2/pages/placeholder");
            then.status(200).json_body(json!({"title": "Placeholder", "body": null}));
        });

        server.mock(|when, then| {
            when.method(GET).path("/files/99/download");
            then.status(200).body("hello world");
        })
    }

    #[test]
    fn failures_are_contained_and_the_rest_of_the_run_completes() {
        let server = MockServer::start();
        let temp = TempDir::new().expect("tempdir");
        let download = mock_catalog(&server);

        let config = archiver_config(&server, temp.path());
        let sender = RequestSender::new(&config).expect("sender");
        let mut archiver = CanvasArchiver::new(sender, &config).expect("archiver");
        let summary = archiver.archive_all().expect("run");

        // History failed at module listing, yet Biology was fully archived.
        let notes = temp.path().join("Biology/Week 1/Syllabus notes.txt");
        assert_eq!(fs::read_to_string(&notes).expect("notes"), "hello world");

        let shortcut =
            fs::read_to_string(temp.path().join("Biology/Week 1/Further reading.url"))
                .expect("shortcut");
        assert!(shortcut.contains("URL=https://example.com/x"));

        // The empty page produced no artifact and did not count as failed.
        assert!(!temp.path().join("Biology/Week 1/Placeholder.pdf").exists());

        assert_eq!(summary.archived, 2, "file and link");
        assert_eq!(summary.skipped, 2, "empty page and unsupported kind");
        assert_eq!(summary.failed, 1, "restricted file only");
        assert_eq!(summary.warnings, 2, "failing course and nameless stub");
        assert_eq!(download.hits(), 1);
    }

    #[test]
    fn a_second_run_against_unchanged_remote_state_downloads_nothing() {
        let server = MockServer::start();
        let temp = TempDir::new().expect("tempdir");
        let download = mock_catalog(&server);

        let config = archiver_config(&server, temp.path());
        let sender = RequestSender::new(&config).expect("sender");

        let mut archiver = CanvasArchiver::new(sender.clone(), &config).expect("archiver");
        archiver.archive_all().expect("first run");
        assert_eq!(download.hits(), 1);

        let mut archiver = CanvasArchiver::new(sender, &config).expect("archiver");
        let summary = archiver.archive_all().expect("second run");

        // The file probed as existing; only the cheap link shortcut was
        // rewritten. Nothing hit the download endpoint again.
        assert_eq!(download.hits(), 1);
        assert_eq!(summary.archived, 1, "link shortcut rewrite");
        assert_eq!(summary.skipped, 3, "file, empty page, unsupported kind");
        assert_eq!(summary.failed, 1, "restricted file fails again");
    }

    /// Mocks one course holding a single module with one office document
    /// item, returning the download mock.
    fn mock_office_course(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses");
            then.status(200).json_body(json!([{"id": 7, "name": "Writing"}]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/7/modules");
            then.status(200).json_body(json!([{"id": 70, "name": "Essays"}]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/7/modules/70/items");
            then.status(200).json_body(json!([
                {"id": 700, "title": "Guidelines", "type": "File", "content_id": 60}
            ]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/7/files/60");
            then.status(200).json_body(json!({
                "id": 60,
                "filename": "guidelines.docx",
                "url": server.url("/files/60/download"),
                "size": 12
            }));
        });

        server.mock(|when, then| {
            when.method(GET).path("/files/60/download");
            then.status(200).body("stale source");
        })
    }

    /// Stages an executable stand-in for a portable converter acquired by an
    /// earlier run, so conversion proceeds without any bootstrap fetch. It
    /// emulates the convert-to CLI by writing an empty output document.
    #[cfg(unix)]
    fn seed_portable_converter(root: &Path) {
        use std::os::unix::fs::PermissionsExt;

        let tools = root.join(".tools");
        fs::create_dir_all(&tools).expect("tools dir");
        let script = tools.join("libreoffice.AppImage");
        fs::write(
            &script,
            "#!/bin/sh\nwhile [ \"$1\" != \"--outdir\" ]; do shift; done\noutdir=\"$2\"\nshift 2\nbase=$(basename \"$1\")\n: > \"$outdir/${base%.*}.pdf\"\n",
        )
        .expect("script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    #[cfg(unix)]
    #[test]
    fn office_sources_reconvert_without_redownloading() {
        let server = MockServer::start();
        let temp = TempDir::new().expect("tempdir");
        let download = mock_office_course(&server);

        // An earlier run downloaded the source but its conversion never
        // produced an output.
        fs::create_dir_all(temp.path().join("Writing/Essays")).expect("module dir");
        fs::write(
            temp.path().join("Writing/Essays/Guidelines.docx"),
            "stale source",
        )
        .expect("seed source");
        seed_portable_converter(temp.path());

        let config = archiver_config(&server, temp.path());
        let sender = RequestSender::new(&config).expect("sender");
        let mut archiver = CanvasArchiver::new(sender, &config).expect("archiver");
        let summary = archiver.archive_all().expect("run");

        assert_eq!(download.hits(), 0, "the source must not be re-downloaded");
        assert_eq!(summary.archived, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn office_items_with_converted_output_are_skipped_entirely() {
        let server = MockServer::start();
        let temp = TempDir::new().expect("tempdir");
        let download = mock_office_course(&server);

        fs::create_dir_all(temp.path().join("Writing/Essays")).expect("module dir");
        fs::write(temp.path().join("Writing/Essays/Guidelines.docx"), "source")
            .expect("seed source");
        fs::write(temp.path().join("Writing/Essays/Guidelines.pdf"), "converted")
            .expect("seed output");

        let config = archiver_config(&server, temp.path());
        let sender = RequestSender::new(&config).expect("sender");
        let mut archiver = CanvasArchiver::new(sender, &config).expect("archiver");
        let summary = archiver.archive_all().expect("run");

        assert_eq!(download.hits(), 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.archived, 0);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn file_sizes_format_with_appropriate_units() {
        assert_eq!(format_file_size(512), "512 bytes");
        assert_eq!(format_file_size(2048), "2.00 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn colliding_item_titles_do_not_abort_the_module() {
        let server = MockServer::start();
        let temp = TempDir::new().expect("tempdir");

        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses");
            then.status(200).json_body(json!([{"id": 5, "name": "Chemistry"}]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/5/modules");
            then.status(200).json_body(json!([{"id": 50, "name": "Labs"}]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/courses/5/modules/50/items");
            then.status(200).json_body(json!([
                {"id": 500, "title": "Report?", "type": "File", "content_id": 40},
                {"id": 501, "title": "Report*", "type": "File", "content_id": 41}
            ]));
        });
        for file_id in [40, 41] {
            server.mock(|when, then| {
                when.method(GET)
                    .path(format!("/api/v1/courses/5/files/{file_id}"));
                then.status(200).json_body(json!({
                    "id": file_id,
                    "filename": "report.txt",
                    "url": server.url(format!("/files/{file_id}/download")),
                    "size": 4
                }));
            });
            server.mock(|when, then| {
                when.method(GET).path(format!("/files/{file_id}/download"));
                then.status(200).body("data");
            });
        }

        let config = archiver_config(&server, temp.path());
        let sender = RequestSender::new(&config).expect("sender");
        let mut archiver = CanvasArchiver::new(sender, &config).expect("archiver");
        let summary = archiver.archive_all().expect("run");

        // Both titles sanitize to "Report_": the first wins the path, the
        // second probes as existing and is skipped instead of clobbering it.
        assert_eq!(summary.archived, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert!(temp.path().join("Chemistry/Labs/Report_.txt").exists());
    }
}
