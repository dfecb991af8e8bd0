//! Request URL extraction from stored protocol headers.

use serde::Serialize;

use crate::ParseError;

/// Host recorded for objects whose header blob yields no URL.
pub const UNKNOWN_HOST: &str = "UNKNOWN_HOST";

const SCHEMES: [&str; 2] = ["http://", "https://"];

/// Request URL of a cached object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RequestUrl {
    pub scheme: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// Path without its leading `/`, query included.
    pub path: String,
}

impl std::fmt::Display for RequestUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://", self.scheme)?;
        match (&self.user, &self.password) {
            (Some(user), Some(pass)) => write!(f, "{}:{}@", user, pass)?,
            (Some(user), None) => write!(f, "{}@", user)?,
            (None, Some(pass)) => write!(f, ":{}@", pass)?,
            (None, None) => {}
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        Ok(())
    }
}

/// Turns the header blob stored after a head `Doc` into a request URL.
pub trait HeaderParser: Send + Sync {
    fn parse(&self, blob: &[u8]) -> Result<RequestUrl, ParseError>;
}

/// Finds the first absolute `http://` or `https://` URL in the blob.
///
/// The stored header is a marshalled heap; the request URL appears in it as
/// a run of printable bytes, which is all this parser relies on.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlScanParser;

impl HeaderParser for UrlScanParser {
    fn parse(&self, blob: &[u8]) -> Result<RequestUrl, ParseError> {
        if blob.is_empty() {
            return Err(ParseError::Empty);
        }

        let (start, scheme) = SCHEMES
            .iter()
            .filter_map(|s| find(blob, s.as_bytes()).map(|at| (at, *s)))
            .min_by_key(|(at, _)| *at)
            .ok_or(ParseError::NoUrl)?;

        let rest = &blob[start + scheme.len()..];
        let end = rest
            .iter()
            .position(|&b| !is_url_byte(b))
            .unwrap_or(rest.len());
        let text = String::from_utf8_lossy(&rest[..end]);

        split_url(scheme.trim_end_matches("://"), &text)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn is_url_byte(b: u8) -> bool {
    b.is_ascii_graphic()
}

fn split_url(scheme: &str, text: &str) -> Result<RequestUrl, ParseError> {
    let (authority, path) = match text.find('/') {
        Some(at) => (&text[..at], &text[at + 1..]),
        None => (text, ""),
    };

    let (userinfo, hostport) = match authority.rfind('@') {
        Some(at) => (Some(&authority[..at]), &authority[at + 1..]),
        None => (None, authority),
    };

    let (user, password) = match userinfo {
        Some(info) => match info.split_once(':') {
            Some((u, p)) => (non_empty(u), non_empty(p)),
            None => (non_empty(info), None),
        },
        None => (None, None),
    };

    let (host, port_text) = if hostport.starts_with('[') {
        // Bracketed IPv6 literal; the brackets stay part of the host.
        match hostport.find(']') {
            Some(close) => (
                &hostport[..=close],
                hostport[close + 1..].strip_prefix(':'),
            ),
            None => return Err(ParseError::NoHost(format!("{}://{}", scheme, text))),
        }
    } else {
        match hostport.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (hostport, None),
        }
    };

    let port = port_text
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| ParseError::BadPort(format!("{}://{}", scheme, text)))
        })
        .transpose()?;

    if host.is_empty() {
        return Err(ParseError::NoHost(format!("{}://{}", scheme, text)));
    }

    Ok(RequestUrl {
        scheme: scheme.to_string(),
        user,
        password,
        host: host.to_ascii_lowercase(),
        port,
        path: path.to_string(),
    })
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
