use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::OnceLock;
use url::Url;

use crate::stream::{MarkableRead, MemoryStream, ReplayReader, BUFFER_SIZE};

/// An inline `data:` reference, decoded eagerly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    mime_type: Option<String>,
    is_base64: bool,
    data: Vec<u8>,
}

fn data_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)^data:([^,;]*)((?:;[^,;]*)*),(.*)$").expect("data uri pattern is valid")
    })
}

impl DataUri {
    pub fn is_data_uri(reference: &str) -> bool {
        reference
            .get(..5)
            .map(|scheme| scheme.eq_ignore_ascii_case("data:"))
            .unwrap_or(false)
    }

    pub fn parse(reference: &str) -> Result<Self> {
        let captures = data_uri_pattern()
            .captures(reference)
            .ok_or_else(|| anyhow!("malformed data uri: missing ',' separator"))?;

        let mime_type = captures
            .get(1)
            .map(|m| m.as_str().trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let is_base64 = captures
            .get(2)
            .map(|params| {
                params
                    .as_str()
                    .split(';')
                    .any(|p| p.trim().eq_ignore_ascii_case("base64"))
            })
            .unwrap_or(false);
        let raw = captures.get(3).map(|m| m.as_str()).unwrap_or_default();

        let data = if is_base64 {
            let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .context("malformed data uri: invalid base64 payload")?
        } else {
            raw.as_bytes().to_vec()
        };

        Ok(Self {
            mime_type,
            is_base64,
            data,
        })
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn is_base64(&self) -> bool {
        self.is_base64
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Where the image bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Data(DataUri),
    Remote(String),
    File(PathBuf),
}

fn scheme_of(reference: &str) -> Option<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*):").expect("scheme pattern is valid")
    });
    pattern
        .captures(reference)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        // Single letters are drive prefixes such as `C:\`.
        .filter(|scheme| scheme.len() > 1)
}

impl ImageSource {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            bail!("empty image reference");
        }
        if DataUri::is_data_uri(reference) {
            return Ok(ImageSource::Data(DataUri::parse(reference)?));
        }

        match scheme_of(reference).map(str::to_ascii_lowercase).as_deref() {
            Some("http") | Some("https") => Ok(ImageSource::Remote(reference.to_string())),
            Some("file") => {
                // Percent-decodes the path; only an empty or `localhost` host is local.
                let path = Url::parse(reference)
                    .with_context(|| format!("malformed file url {}", reference))?
                    .to_file_path()
                    .map_err(|()| anyhow!("file url does not name a local path: {}", reference))?;
                Ok(ImageSource::File(path))
            }
            Some(other) => bail!("unsupported url scheme '{}' in {}", other, reference),
            None => Ok(ImageSource::File(PathBuf::from(reference))),
        }
    }

    pub fn open(&self) -> Result<OpenedStream> {
        match self {
            ImageSource::Data(uri) => Ok(OpenedStream::Memory(MemoryStream::new(uri.data().to_vec()))),
            ImageSource::Remote(url) => {
                let response = attohttpc::get(url)
                    .send()
                    .with_context(|| format!("failed to fetch {}", url))?;
                if !response.is_success() {
                    bail!("fetching {} returned HTTP {}", url, response.status());
                }
                let (_status, _headers, reader) = response.split();
                Ok(OpenedStream::Remote(Box::new(reader)))
            }
            ImageSource::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                Ok(OpenedStream::Remote(Box::new(file)))
            }
        }
    }
}

/// A freshly opened byte stream for an image reference.
pub enum OpenedStream {
    /// Fully buffered, rewinds natively.
    Memory(MemoryStream),
    /// Forward-only.
    Remote(Box<dyn Read>),
}

impl OpenedStream {
    pub fn supports_mark(&self) -> bool {
        matches!(self, OpenedStream::Memory(_))
    }

    /// Forward-only streams get wrapped in a [`ReplayReader`] of
    /// [`BUFFER_SIZE`] bytes.
    pub fn into_markable(self) -> Box<dyn MarkableRead> {
        match self {
            OpenedStream::Memory(stream) => Box::new(stream),
            OpenedStream::Remote(reader) => Box::new(ReplayReader::with_capacity(BUFFER_SIZE, reader)),
        }
    }
}

/// Factory for the byte stream of one image reference. May be asked to open
/// the stream a second time when the bounds probe could not be rewound.
pub trait StreamSource: Send + Sync {
    fn open(&self) -> Result<OpenedStream>;

    fn describe(&self) -> String;
}

/// Opens whatever a URL or data URI string points at.
#[derive(Debug, Clone)]
pub struct UrlSource {
    url: String,
}

impl UrlSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl StreamSource for UrlSource {
    fn open(&self) -> Result<OpenedStream> {
        ImageSource::parse(&self.url)?.open()
    }

    fn describe(&self) -> String {
        if DataUri::is_data_uri(&self.url) {
            let shown: String = self.url.chars().take(32).collect();
            format!("{}... ({} chars)", shown, self.url.len())
        } else {
            self.url.clone()
        }
    }
}
