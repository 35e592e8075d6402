use log::{info, warn};

use crate::{
    error::ResolveError,
    transport::{self, HttpConnection},
    version::VersionToken,
};

/// Fetches the latest published version token. One request, no redirects, no
/// retries. Only a 200 response with a non-blank body yields a token.
pub fn resolve_latest_version<C: HttpConnection + ?Sized>(
    conn: &mut C,
    url: &str,
    max_len: usize,
) -> Result<VersionToken, ResolveError> {
    let mut response = transport::open(conn, url).map_err(|err| {
        warn!("version check failed: {err}");
        ResolveError::from(err)
    })?;

    let status = response.head().status;
    if !response.head().is_ok() {
        warn!("version check failed, HTTP {status}");
        return Err(ResolveError::Status(status));
    }

    let mut body = Vec::with_capacity(max_len.min(64));
    let mut chunk = [0_u8; 64];
    loop {
        let read = response.read(&mut chunk).map_err(|err| {
            warn!("version check failed while reading body: {err}");
            ResolveError::from(err)
        })?;
        if read == 0 {
            break;
        }
        if body.len() + read > max_len {
            warn!("version body exceeds {max_len} bytes");
            return Err(ResolveError::TooLong { limit: max_len });
        }
        body.extend_from_slice(&chunk[..read]);
    }
    drop(response);

    let token = VersionToken::parse(&String::from_utf8_lossy(&body)).ok_or_else(|| {
        warn!("version endpoint returned an empty body");
        ResolveError::Empty
    })?;
    info!("latest published version: {token}");
    Ok(token)
}
