use crate::internal::*;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where an image comes from: a local file or an http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Url(String),
}

impl ImageSource {
    /// Anything starting with `http://` or `https://` is a URL, the rest is a path.
    pub fn parse(s: &str) -> ImageSource {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageSource::Url(s.to_string())
        } else {
            ImageSource::Path(PathBuf::from(s))
        }
    }

    /// Reads the raw image bytes. No retry, no size limit; `timeout` bounds remote fetches.
    pub fn read_bytes(&self, timeout: Option<Duration>) -> TractResult<Vec<u8>> {
        match self {
            ImageSource::Path(path) => std::fs::read(path)
                .with_context(|| format!("Reading image file {}", path.display())),
            ImageSource::Url(url) => fetch(url, timeout),
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ImageSource::Path(path) => write!(f, "{}", path.display()),
            ImageSource::Url(url) => f.write_str(url),
        }
    }
}

// The blocking client owns a runtime, so it lives and dies on the calling thread.
fn fetch(url: &str, timeout: Option<Duration>) -> TractResult<Vec<u8>> {
    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("Fetching {url}"))?
        .error_for_status()
        .with_context(|| format!("Fetching {url}"))?;
    let bytes = response.bytes().with_context(|| format!("Reading body of {url}"))?;
    debug!("Fetched {} bytes from {url}", bytes.len());
    Ok(bytes.to_vec())
}
