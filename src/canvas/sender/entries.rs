use serde::Deserialize;

/// The authenticated user, as returned by the `users/self` probe.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct UserEntry {
    pub(crate) id: i64,
    pub(crate) name: String,
}

/// One course from the user's active enrollments. Restricted enrollments
/// come back as stubs without a name and are skipped by the archiver.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct CourseEntry {
    pub(crate) id: i64,
    pub(crate) name: Option<String>,
}

/// One module inside a course, in remote listing order.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct ModuleEntry {
    pub(crate) id: i64,
    pub(crate) name: String,
}

/// The closed set of module item kinds the archiver understands. Anything
/// else the remote invents deserializes to [ItemKind::Other] and is ignored.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(from = "String")]
pub(crate) enum ItemKind {
    File,
    Page,
    ExternalUrl,
    Other,
}

impl From<String> for ItemKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "File" => ItemKind::File,
            "Page" => ItemKind::Page,
            "ExternalUrl" => ItemKind::ExternalUrl,
            _ => ItemKind::Other,
        }
    }
}

/// One item inside a module. The content reference is kind-specific: a file
/// id, a page slug, or a URL string.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct ModuleItemEntry {
    pub(crate) id: i64,
    pub(crate) title: String,
    #[serde(rename = "type")]
    pub(crate) kind: ItemKind,
    pub(crate) content_id: Option<i64>,
    pub(crate) page_url: Option<String>,
    pub(crate) external_url: Option<String>,
}

/// File metadata fetched before a download; `url` is the download URL.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct FileEntry {
    pub(crate) id: i64,
    pub(crate) filename: String,
    pub(crate) url: String,
    pub(crate) size: Option<u64>,
}

/// A wiki page's title and body markup. The body may be missing entirely.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PageEntry {
    pub(crate) title: Option<String>,
    pub(crate) body: Option<String>,
}
