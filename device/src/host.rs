use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;
use reqwest::{blocking::Client, header::LOCATION, redirect::Policy};
use tracing::{debug, info, warn};

use otaboot_common::{
    config::TlsVerification, Blinker, BootUpdater, DeviceConfig, FlashError, FlashSession,
    FlashWriter, HttpConnection, IndicatorPin, PinError, ResponseHead, Restart, TransportError,
    UpdateConfig, UpdateOutcome,
};

const IMAGE_FILE: &str = "firmware.bin";
const STAGING_FILE: &str = "firmware.bin.partial";
const DEFAULT_SLOT_BYTES: u64 = 1_966_080;
const HTTP_TIMEOUT_SECS: u64 = 30;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = HostStore::new();
    let mut config = store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load device config from store: {err:#}");
        default_config()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    info!(
        "simulated device starting, version {} (tls {})",
        config.update.current_version,
        config.update.tls.as_str()
    );

    let update = config.update.clone();
    let flash_dir = store.flash_dir.clone();
    let slot_bytes = std::env::var("OTABOOT_SLOT_BYTES")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_SLOT_BYTES);

    let finished =
        tokio::task::spawn_blocking(move || run_boot_update(&update, flash_dir, slot_bytes))
            .await
            .context("boot update task panicked")
            .and_then(|result| result);

    if !keeps_running(&finished) {
        return Ok(());
    }

    let mut blinker = Blinker::new(config.liveness);
    let mut pin = LogPin {
        gpio: config.liveness.gpio,
    };
    let mut interval = tokio::time::interval(blinker.half_period());

    loop {
        interval.tick().await;
        if let Err(err) = blinker.toggle(&mut pin) {
            warn!("liveness toggle failed: {err}");
        }
    }
}

fn run_boot_update(
    config: &UpdateConfig,
    flash_dir: PathBuf,
    slot_bytes: u64,
) -> anyhow::Result<UpdateOutcome> {
    let mut conn = ReqwestConnection::new(config.tls)?;
    let mut flash = FileFlash::new(flash_dir, slot_bytes);
    let mut restart = HostRestart::default();

    let outcome = BootUpdater::new(config, &mut conn, &mut flash, &mut restart).run();
    if restart.requested {
        info!("restart pending, new image staged at {}", flash.image_path().display());
    }
    Ok(outcome)
}

/// Only a committed image ends the run; every failure falls through to the
/// liveness loop.
fn keeps_running(finished: &anyhow::Result<UpdateOutcome>) -> bool {
    match finished {
        Ok(outcome) if !outcome.falls_through() => {
            info!("simulated restart into the new image; exiting");
            false
        }
        Ok(outcome) => {
            info!("boot update finished with {}; continuing", outcome.as_str());
            true
        }
        Err(err) => {
            warn!("boot update unavailable, continuing: {err:#}");
            true
        }
    }
}

fn default_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.update.current_version = env!("CARGO_PKG_VERSION").to_string();
    config
}

fn apply_env_overrides(config: &mut DeviceConfig) {
    if let Ok(url) = std::env::var("OTABOOT_VERSION_URL") {
        config.update.version_url = url;
    }
    if let Ok(url) = std::env::var("OTABOOT_FIRMWARE_URL") {
        config.update.firmware_url = url;
    }
    if let Ok(version) = std::env::var("OTABOOT_CURRENT_VERSION") {
        config.update.current_version = version;
    }
    if let Ok(value) = std::env::var("OTABOOT_TLS_INSECURE") {
        if matches!(value.trim(), "1" | "true" | "yes") {
            config.update.tls = TlsVerification::Insecure;
        }
    }
}

struct HostStore {
    config_path: PathBuf,
    flash_dir: PathBuf,
}

impl HostStore {
    fn new() -> Self {
        let data_dir = std::env::var("OTABOOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.otaboot"));
        Self::at(data_dir)
    }

    fn at(data_dir: PathBuf) -> Self {
        Self {
            config_path: data_dir.join("device.json"),
            flash_dir: data_dir.join("flash"),
        }
    }

    async fn load_config(&self) -> anyhow::Result<DeviceConfig> {
        match tokio::fs::read(&self.config_path).await {
            Ok(raw) => serde_json::from_slice::<DeviceConfig>(&raw)
                .with_context(|| format!("invalid config at {}", self.config_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(default_config()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Blocking HTTP client that leaves redirects to the caller.
struct ReqwestConnection {
    client: Client,
    response: Option<reqwest::blocking::Response>,
}

impl ReqwestConnection {
    fn new(tls: TlsVerification) -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(tls.is_insecure())
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            response: None,
        })
    }
}

impl HttpConnection for ReqwestConnection {
    fn get(&mut self, url: &str) -> Result<ResponseHead, TransportError> {
        self.response = None;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| TransportError::request(url, err.to_string()))?;

        let head = ResponseHead {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            location: response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        };
        debug!("GET {url} -> {}", head.status);
        self.response = Some(response);
        Ok(head)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let response = self
            .response
            .as_mut()
            .ok_or_else(|| TransportError::Read("no response in flight".to_string()))?;
        response
            .read(buf)
            .map_err(|err| TransportError::Read(err.to_string()))
    }

    fn release(&mut self) {
        self.response = None;
    }
}

/// Update slot backed by a directory. Images are staged next to the boot
/// image and only renamed into place on commit.
struct FileFlash {
    dir: PathBuf,
    capacity: u64,
}

impl FileFlash {
    fn new(dir: PathBuf, capacity: u64) -> Self {
        Self { dir, capacity }
    }

    fn image_path(&self) -> PathBuf {
        self.dir.join(IMAGE_FILE)
    }

    fn staging_path(&self) -> PathBuf {
        self.dir.join(STAGING_FILE)
    }
}

struct FileSession<'a> {
    flash: &'a mut FileFlash,
    file: Option<File>,
    expected: u64,
    written: u64,
}

impl FlashWriter for FileFlash {
    type Session<'a> = FileSession<'a>;

    fn open(&mut self, expected_size: u64) -> Result<Self::Session<'_>, FlashError> {
        if expected_size > self.capacity {
            return Err(FlashError::InsufficientSpace {
                requested: expected_size,
                capacity: self.capacity,
            });
        }

        fs::create_dir_all(&self.dir)
            .map_err(|err| FlashError::NoUpdateSlot(format!("{}: {err}", self.dir.display())))?;
        let file = File::create(self.staging_path())
            .map_err(|err| FlashError::NoUpdateSlot(err.to_string()))?;
        info!(
            "staging {expected_size} byte image in {}",
            self.staging_path().display()
        );

        Ok(FileSession {
            flash: self,
            file: Some(file),
            expected: expected_size,
            written: 0,
        })
    }
}

impl FileSession<'_> {
    fn discard(&mut self) -> Result<(), FlashError> {
        self.file = None;
        match fs::remove_file(self.flash.staging_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FlashError::Abort(err.to_string())),
        }
    }
}

impl FlashSession for FileSession<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, FlashError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FlashError::Write("session already finished".to_string()))?;
        if self.written + bytes.len() as u64 > self.expected {
            return Err(FlashError::Write(format!(
                "write past declared size of {} bytes",
                self.expected
            )));
        }
        file.write_all(bytes)
            .map_err(|err| FlashError::Write(err.to_string()))?;
        self.written += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn abort(mut self) -> Result<(), FlashError> {
        self.discard()
    }

    fn commit(mut self) -> Result<(), FlashError> {
        if self.written != self.expected {
            let reason = format!("image has {} of {} bytes", self.written, self.expected);
            self.discard()?;
            return Err(FlashError::Commit(reason));
        }

        let file = self
            .file
            .take()
            .ok_or_else(|| FlashError::Commit("session already finished".to_string()))?;
        let synced = file.sync_all();
        drop(file);

        if let Err(err) =
            synced.and_then(|()| fs::rename(self.flash.staging_path(), self.flash.image_path()))
        {
            if let Err(cleanup) = self.discard() {
                warn!("failed to discard staged image: {cleanup}");
            }
            return Err(FlashError::Commit(err.to_string()));
        }
        info!("boot image replaced at {}", self.flash.image_path().display());
        Ok(())
    }
}

impl Drop for FileSession<'_> {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(err) = self.discard() {
                warn!("failed to discard unfinished image: {err}");
            }
        }
    }
}

#[derive(Default)]
struct HostRestart {
    requested: bool,
}

impl Restart for HostRestart {
    fn restart(&mut self) {
        info!("device restart requested");
        self.requested = true;
    }
}

struct LogPin {
    gpio: i32,
}

impl IndicatorPin for LogPin {
    fn set_high(&mut self, high: bool) -> Result<(), PinError> {
        debug!("GPIO{} -> {}", self.gpio, if high { "HIGH" } else { "LOW" });
        Ok(())
    }
}
