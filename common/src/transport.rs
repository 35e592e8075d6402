//! HTTP capability used by the resolver and the flasher.
//!
//! Implementations perform a single GET per call to [`HttpConnection::get`]
//! and must not follow redirects themselves; [`open_following_redirects`]
//! does that with a bounded hop count.

use log::{debug, info};

use crate::error::TransportError;

pub mod status {
    pub const OK: u16 = 200;
    pub const MOVED_PERMANENTLY: u16 = 301;
    pub const FOUND: u16 = 302;
    pub const SEE_OTHER: u16 = 303;
    pub const TEMPORARY_REDIRECT: u16 = 307;
    pub const PERMANENT_REDIRECT: u16 = 308;

    pub fn is_redirect(code: u16) -> bool {
        matches!(
            code,
            MOVED_PERMANENTLY | FOUND | SEE_OTHER | TEMPORARY_REDIRECT | PERMANENT_REDIRECT
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<u64>,
    pub location: Option<String>,
}

impl ResponseHead {
    pub fn is_ok(&self) -> bool {
        self.status == status::OK
    }
}

pub trait HttpConnection {
    /// Sends a GET and reads the response head. The body is then available
    /// through [`HttpConnection::read`] until [`HttpConnection::release`].
    fn get(&mut self, url: &str) -> Result<ResponseHead, TransportError>;

    /// Reads body bytes; `Ok(0)` marks the end of the body.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Drops the current response and its connection resources.
    fn release(&mut self);
}

/// An in-flight response. Releases the connection exactly once when dropped.
pub struct OpenResponse<'c, C: HttpConnection + ?Sized> {
    conn: &'c mut C,
    head: ResponseHead,
    url: String,
}

impl<'c, C: HttpConnection + ?Sized> OpenResponse<'c, C> {
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// URL the response was served from, after any redirects.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.conn.read(buf)
    }
}

impl<C: HttpConnection + ?Sized> Drop for OpenResponse<'_, C> {
    fn drop(&mut self) {
        self.conn.release();
    }
}

/// Single request, redirects are returned to the caller as-is.
pub fn open<'c, C: HttpConnection + ?Sized>(
    conn: &'c mut C,
    url: &str,
) -> Result<OpenResponse<'c, C>, TransportError> {
    let head = match conn.get(url) {
        Ok(head) => head,
        Err(err) => {
            conn.release();
            return Err(err);
        }
    };

    Ok(OpenResponse {
        conn,
        head,
        url: url.to_string(),
    })
}

pub fn open_following_redirects<'c, C: HttpConnection + ?Sized>(
    conn: &'c mut C,
    url: &str,
    max_redirects: u8,
) -> Result<OpenResponse<'c, C>, TransportError> {
    let mut current = url.to_string();
    let mut hops: u8 = 0;

    loop {
        let head = match conn.get(&current) {
            Ok(head) => head,
            Err(err) => {
                conn.release();
                return Err(err);
            }
        };

        let redirect_to = if status::is_redirect(head.status) {
            head.location.clone()
        } else {
            None
        };
        let Some(location) = redirect_to else {
            return Ok(OpenResponse {
                conn,
                head,
                url: current,
            });
        };
        conn.release();

        if hops >= max_redirects {
            return Err(TransportError::TooManyRedirects {
                url: url.to_string(),
                limit: max_redirects,
            });
        }
        hops += 1;

        let next = resolve_location(&current, &location)?;
        info!(
            "HTTP {} redirect {hops}/{max_redirects}: {current} -> {next}",
            head.status
        );
        current = next;
    }
}

/// Resolves a `Location` header against the URL that produced it. Absolute
/// http(s) URLs and absolute paths are supported.
pub fn resolve_location(base: &str, location: &str) -> Result<String, TransportError> {
    let location = location.trim();
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }

    if location.starts_with('/') && !location.starts_with("//") {
        let scheme_end = base
            .find("://")
            .ok_or_else(|| TransportError::BadLocation(location.to_string()))?;
        let authority_start = scheme_end + 3;
        let authority_end = base[authority_start..]
            .find(['/', '?', '#'])
            .map(|offset| authority_start + offset)
            .unwrap_or(base.len());
        debug!("resolving relative redirect `{location}` against `{base}`");
        return Ok(format!("{}{location}", &base[..authority_end]));
    }

    Err(TransportError::BadLocation(location.to_string()))
}
