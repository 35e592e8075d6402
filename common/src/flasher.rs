use std::fmt::Write as _;

use log::{error, info, warn};
use sha2::{Digest, Sha256};

use crate::{
    config::UpdateConfig,
    error::UpdateError,
    flash::{FlashSession, FlashWriter},
    transport::{self, HttpConnection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOptions {
    pub max_redirects: u8,
    pub chunk_size: usize,
}

impl From<&UpdateConfig> for FlashOptions {
    fn from(config: &UpdateConfig) -> Self {
        Self {
            max_redirects: config.max_redirects,
            chunk_size: config.chunk_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    pub bytes_written: u64,
    /// Hex SHA-256 of the bytes written, for the log only.
    pub sha256: String,
}

/// Streams the image at `url` into a new flash session and commits it.
///
/// The image is committed only when exactly the declared number of bytes was
/// written. Every failure after the session opens aborts the session, and the
/// HTTP response is released on every path.
pub fn download_and_flash<C, F>(
    conn: &mut C,
    flash: &mut F,
    url: &str,
    options: FlashOptions,
) -> Result<FlashReport, UpdateError>
where
    C: HttpConnection + ?Sized,
    F: FlashWriter + ?Sized,
{
    info!("downloading firmware from {url}");
    let mut response = transport::open_following_redirects(conn, url, options.max_redirects)
        .map_err(|err| {
            error!("firmware request failed: {err}");
            UpdateError::from(err)
        })?;

    let head = response.head().clone();
    if !head.is_ok() {
        error!("firmware download failed, HTTP {}", head.status);
        return Err(UpdateError::Status(head.status));
    }

    let expected = match head.content_length {
        Some(length) if length > 0 => length,
        other => {
            error!("firmware response has unusable content length {other:?}");
            return Err(UpdateError::MissingContentLength);
        }
    };
    info!("firmware image size: {expected} bytes");

    let mut session = flash.open(expected).map_err(|err| {
        error!("cannot begin flash session for {expected} bytes: {err}");
        UpdateError::SessionOpen(err)
    })?;

    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    let mut chunk = vec![0_u8; options.chunk_size.max(1)];

    let streamed: Result<(), UpdateError> = loop {
        let read = match response.read(&mut chunk) {
            Ok(0) => break Ok(()),
            Ok(read) => read,
            Err(err) => {
                error!("firmware stream failed after {written} bytes: {err}");
                break Err(UpdateError::Transport(err));
            }
        };

        if written + read as u64 > expected {
            error!("firmware stream exceeds declared length of {expected} bytes");
            break Err(UpdateError::LengthMismatch {
                expected,
                written: written + read as u64,
            });
        }

        let accepted = match session.write(&chunk[..read]) {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("flash write failed at offset {written}: {err}");
                break Err(UpdateError::Write(err));
            }
        };
        hasher.update(&chunk[..accepted]);
        written += accepted as u64;

        if accepted != read {
            error!("flash accepted only {accepted} of {read} bytes");
            break Ok(());
        }
    };
    drop(response);

    if let Err(err) = streamed {
        abort_session(session);
        return Err(err);
    }

    if written != expected {
        error!("written size {written} does not match expected {expected}, aborting");
        abort_session(session);
        return Err(UpdateError::LengthMismatch { expected, written });
    }

    session.commit().map_err(|err| {
        error!("flash commit failed: {err}");
        UpdateError::Commit(err)
    })?;

    let sha256 = hex(&hasher.finalize());
    info!("firmware committed: {written} bytes, sha256 {sha256}");
    Ok(FlashReport {
        bytes_written: written,
        sha256,
    })
}

fn abort_session<S: FlashSession>(session: S) {
    if let Err(err) = session.abort() {
        warn!("flash abort reported: {err}");
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
