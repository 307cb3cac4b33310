use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::Settings;
use crate::error::RemoteError;

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*"([^"]+)""#).expect("valid href pattern"));

/// Read access to the hierarchical genome archive.
pub trait RemoteArchive {
    /// Names of the entries inside the directory at `path` (relative to the
    /// archive root, starting with `/`).
    fn list_dir(&self, path: &str) -> Result<Vec<String>, RemoteError>;

    /// Streams `url` into `destination` and returns the number of bytes
    /// written. A short body is reported as an error.
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<u64, RemoteError>;

    /// Absolute URL of a path inside the archive.
    fn url_for(&self, path: &str) -> String;
}

/// Opens a fresh session on the archive. Used by the resolver to reconnect
/// after the previous session failed.
pub trait ArchiveFactory {
    type Archive: RemoteArchive;

    fn connect(&self) -> Result<Self::Archive, RemoteError>;
}

#[derive(Clone)]
pub struct HttpArchive {
    client: Client,
    download_client: Client,
    base_url: String,
}

impl HttpArchive {
    pub fn new(settings: &Settings) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("refsketch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RemoteError::Local(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers.clone())
            .timeout(settings.http_timeout)
            .connect_timeout(settings.http_timeout)
            .build()
            .map_err(|err| RemoteError::Transient(err.to_string()))?;
        let download_client = Client::builder()
            .default_headers(headers)
            .timeout(settings.download_timeout)
            .connect_timeout(settings.http_timeout)
            .build()
            .map_err(|err| RemoteError::Transient(err.to_string()))?;

        Ok(Self {
            client,
            download_client,
            base_url: settings.remote_base_url.clone(),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, RemoteError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(RemoteError::Transient(err.to_string()));
                }
            }
        }
    }
}

impl RemoteArchive for HttpArchive {
    fn list_dir(&self, path: &str) -> Result<Vec<String>, RemoteError> {
        let url = format!("{}/", self.url_for(path));
        debug!(%url, "listing remote directory");
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = check_status(response, path)?;
        let body = response
            .text()
            .map_err(|err| RemoteError::Transient(err.to_string()))?;
        Ok(parse_listing(&body))
    }

    fn download(&self, url: &str, destination: &Utf8Path) -> Result<u64, RemoteError> {
        let response = self.send_with_retries(|| self.download_client.get(url))?;
        let mut response = check_status(response, url)?;
        let expected = response.content_length();

        let file = File::create(destination.as_std_path())
            .map_err(|err| RemoteError::Local(format!("create {destination}: {err}")))?;
        let mut writer = BufWriter::new(file);
        let written = std::io::copy(&mut response, &mut writer)
            .map_err(|err| RemoteError::Transient(format!("{url}: {err}")))?;
        writer
            .flush()
            .map_err(|err| RemoteError::Local(format!("write {destination}: {err}")))?;

        if let Some(expected) = expected {
            if expected != written {
                return Err(RemoteError::Transient(format!(
                    "{url}: received {written} of {expected} bytes"
                )));
            }
        }
        Ok(written)
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

pub struct HttpArchiveFactory {
    settings: Settings,
}

impl HttpArchiveFactory {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl ArchiveFactory for HttpArchiveFactory {
    type Archive = HttpArchive;

    fn connect(&self) -> Result<HttpArchive, RemoteError> {
        HttpArchive::new(&self.settings)
    }
}

fn check_status(
    response: reqwest::blocking::Response,
    path: &str,
) -> Result<reqwest::blocking::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(RemoteError::NotFound(path.to_string()));
    }
    if is_retryable_status(status.as_u16()) {
        return Err(RemoteError::Transient(format!("status {status} for {path}")));
    }
    Err(RemoteError::Status {
        status: status.as_u16(),
        path: path.to_string(),
    })
}

/// Entry names from an HTML directory index. Parent, absolute and query links
/// are ignored; a trailing `/` on directories is stripped.
pub fn parse_listing(body: &str) -> Vec<String> {
    let mut names = Vec::new();
    for capture in HREF.captures_iter(body) {
        let href = &capture[1];
        if href.starts_with('/')
            || href.starts_with('?')
            || href.starts_with('#')
            || href.starts_with("..")
            || href.contains("://")
        {
            continue;
        }
        let name = href.trim_end_matches('/');
        if !name.is_empty() && !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_skips_parent_and_absolute_links() {
        let body = r#"<html><body><h1>Index of /genomes/all/GCA/000/001/405</h1>
<pre>Name  Last modified  Size<hr><a href="/genomes/all/GCA/000/001/">Parent Directory</a>
<a href="GCA_000001405.28_GRCh38.p13/">GCA_000001405.28_GRCh38.p13/</a>  2022-02-07 13:05    -
<a href="GCA_000001405.29_GRCh38.p14/">GCA_000001405.29_GRCh38.p14/</a>  2022-02-07 13:05    -
<a href="?C=M;O=A">Last modified</a>
<a href="https://www.ncbi.nlm.nih.gov/">NCBI</a>
</pre></body></html>"#;
        assert_eq!(
            parse_listing(body),
            vec![
                "GCA_000001405.28_GRCh38.p13".to_string(),
                "GCA_000001405.29_GRCh38.p14".to_string(),
            ]
        );
    }

    #[test]
    fn listing_of_empty_page() {
        assert!(parse_listing("<html></html>").is_empty());
    }
}
