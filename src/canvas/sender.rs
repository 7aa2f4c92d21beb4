use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::canvas::io::Config;
use crate::canvas::sender::entries::{
    CourseEntry, FileEntry, ModuleEntry, ModuleItemEntry, PageEntry, UserEntry,
};

pub(crate) mod entries;

/// How long to wait for a TCP/TLS handshake before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall deadline for a metadata API call, so one unresponsive endpoint
/// cannot hang the whole run.
const API_TIMEOUT: Duration = Duration::from_secs(60);

/// Page size requested from every list endpoint.
const PER_PAGE: u32 = 100;

/// Matches the `rel="next"` target in an RFC 5988 `Link` header.
static NEXT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).expect("next-link pattern is valid")
});

/// Errors raised while talking to the Canvas API.
#[derive(Error, Debug)]
pub(crate) enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },

    #[error("API returned {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

/// The sender used for all API calls. Holds two blocking clients: one with a
/// hard deadline for metadata calls, and one without a body deadline for
/// file downloads that may run for minutes.
#[derive(Debug, Clone)]
pub(crate) struct RequestSender {
    api_client: Client,
    download_client: Client,
    base_url: String,
    token: String,
}

impl RequestSender {
    /// Builds the sender from the validated configuration.
    pub(crate) fn new(config: &Config) -> Result<Self, ApiError> {
        let user_agent = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

        let api_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(API_TIMEOUT)
            .use_rustls_tls()
            .user_agent(&user_agent)
            .build()
            .map_err(ApiError::Client)?;

        // Lecture recordings run to hundreds of megabytes; no overall
        // deadline is set, so only the connect phase is bounded here.
        let download_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .use_rustls_tls()
            .user_agent(&user_agent)
            .build()
            .map_err(ApiError::Client)?;

        Ok(RequestSender {
            api_client,
            download_client,
            base_url: config.api_url().to_string(),
            token: config.api_token().to_string(),
        })
    }

    /// The authenticated user behind the configured token.
    pub(crate) fn get_current_user(&self) -> Result<UserEntry, ApiError> {
        self.get_json(&self.endpoint("users/self"))
    }

    /// All courses the user is actively enrolled in.
    pub(crate) fn active_courses(&self) -> Result<Vec<CourseEntry>, ApiError> {
        let url = format!(
            "{}?enrollment_state=active&per_page={PER_PAGE}",
            self.endpoint("courses")
        );
        self.get_paged(url)
    }

    /// All modules of a course, in remote listing order.
    pub(crate) fn modules(&self, course_id: i64) -> Result<Vec<ModuleEntry>, ApiError> {
        let url = format!(
            "{}?per_page={PER_PAGE}",
            self.endpoint(&format!("courses/{course_id}/modules"))
        );
        self.get_paged(url)
    }

    /// All items of a module, in remote listing order.
    pub(crate) fn module_items(
        &self,
        course_id: i64,
        module_id: i64,
    ) -> Result<Vec<ModuleItemEntry>, ApiError> {
        let url = format!(
            "{}?per_page={PER_PAGE}",
            self.endpoint(&format!("courses/{course_id}/modules/{module_id}/items"))
        );
        self.get_paged(url)
    }

    /// Metadata of a single file, including its download URL and size.
    pub(crate) fn file(&self, course_id: i64, file_id: i64) -> Result<FileEntry, ApiError> {
        self.get_json(&self.endpoint(&format!("courses/{course_id}/files/{file_id}")))
    }

    /// A wiki page's title and body markup, addressed by its slug.
    pub(crate) fn page(&self, course_id: i64, page_url: &str) -> Result<PageEntry, ApiError> {
        self.get_json(&self.endpoint(&format!("courses/{course_id}/pages/{page_url}")))
    }

    /// Opens a streaming response for a file download. Non-success statuses
    /// fail here, before any byte lands on disk.
    pub(crate) fn stream(&self, url: &str) -> Result<Response, ApiError> {
        let response = self
            .download_client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    /// GET a single JSON entity.
    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.send(url)?;
        response.json().map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// GET a list endpoint, following `rel="next"` links until exhausted.
    fn get_paged<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>, ApiError> {
        let mut entries = Vec::new();
        let mut next_url = Some(first_url);

        while let Some(url) = next_url {
            let response = self.send(&url)?;
            next_url = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_link);

            let mut page: Vec<T> = response.json().map_err(|source| ApiError::Decode {
                url: url.clone(),
                source,
            })?;
            entries.append(&mut page);
        }

        Ok(entries)
    }

    fn send(&self, url: &str) -> Result<Response, ApiError> {
        trace!("GET {}", url);
        let response = self
            .api_client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }
}

/// Extracts the `rel="next"` target from a `Link` header value.
fn next_link(header: &str) -> Option<String> {
    NEXT_LINK
        .captures(header)
        .map(|captures| captures[1].to_string())
}
