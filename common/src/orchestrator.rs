use log::{error, info, warn};

use crate::{
    config::UpdateConfig,
    error::{ResolveError, UpdateError},
    flash::FlashWriter,
    flasher::{self, FlashOptions, FlashReport},
    resolver,
    transport::HttpConnection,
    version::{self, UpdateDecision, VersionToken},
};

/// Device restart. On hardware this never returns.
pub trait Restart {
    fn restart(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { version: VersionToken },
    ResolveFailed(ResolveError),
    FlashFailed { latest: VersionToken, error: UpdateError },
    Restarted { latest: VersionToken, report: FlashReport },
}

impl UpdateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpToDate { .. } => "UP_TO_DATE",
            Self::ResolveFailed(_) => "RESOLVE_FAILED",
            Self::FlashFailed { .. } => "FLASH_FAILED",
            Self::Restarted { .. } => "RESTARTED",
        }
    }

    /// True when boot continues on the current image.
    pub fn falls_through(&self) -> bool {
        !matches!(self, Self::Restarted { .. })
    }
}

/// Runs the boot-time update check once: resolve, decide, flash, restart.
pub struct BootUpdater<'a, C: ?Sized, F: ?Sized, R: ?Sized> {
    config: &'a UpdateConfig,
    conn: &'a mut C,
    flash: &'a mut F,
    restart: &'a mut R,
}

impl<'a, C, F, R> BootUpdater<'a, C, F, R>
where
    C: HttpConnection + ?Sized,
    F: FlashWriter + ?Sized,
    R: Restart + ?Sized,
{
    pub fn new(
        config: &'a UpdateConfig,
        conn: &'a mut C,
        flash: &'a mut F,
        restart: &'a mut R,
    ) -> Self {
        Self {
            config,
            conn,
            flash,
            restart,
        }
    }

    pub fn run(self) -> UpdateOutcome {
        let current = self.config.current_version.as_str();
        info!("running firmware version {current}");
        if self.config.tls.is_insecure() {
            warn!("TLS certificate verification is DISABLED for update downloads");
        }

        let latest = match resolver::resolve_latest_version(
            &mut *self.conn,
            &self.config.version_url,
            self.config.max_version_len,
        ) {
            Ok(latest) => latest,
            Err(err) => {
                warn!("skipping update, version check failed: {err}");
                return UpdateOutcome::ResolveFailed(err);
            }
        };

        match version::decide(current, &latest) {
            UpdateDecision::UpToDate => {
                info!("firmware is up to date ({latest})");
                return UpdateOutcome::UpToDate { version: latest };
            }
            UpdateDecision::Available => {
                info!("update available: {current} -> {latest}");
            }
        }

        match flasher::download_and_flash(
            &mut *self.conn,
            &mut *self.flash,
            &self.config.firmware_url,
            FlashOptions::from(self.config),
        ) {
            Ok(report) => {
                info!(
                    "update to {latest} written ({} bytes), restarting",
                    report.bytes_written
                );
                self.restart.restart();
                UpdateOutcome::Restarted { latest, report }
            }
            Err(err) => {
                error!(
                    "update to {latest} failed ({} error): {err}; keeping {current}",
                    err.kind().as_str()
                );
                UpdateOutcome::FlashFailed { latest, error: err }
            }
        }
    }
}
