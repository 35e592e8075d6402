use core::convert::TryInto;
use std::{thread, time::Duration};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::Read,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyOutputPin, Level, Output, PinDriver};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{
        Configuration as HttpClientConfiguration, EspHttpConnection, FollowRedirectsPolicy,
    },
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    ota::{EspOta, EspOtaUpdate, Slot},
    sys::EspError,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use otaboot_common::{
    config::{AssociationPolicy, LivenessConfig, NetworkConfig, TlsVerification},
    wait_until_associated, Association, Blinker, BootUpdater, DeviceConfig, FlashError,
    FlashSession, FlashWriter, HttpConnection, IndicatorPin, PinError, ResponseHead, Restart,
    TransportError, UpdateConfig,
};

const CURRENT_VERSION: &str = match option_env!("OTABOOT_FIRMWARE_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};
const VERSION_URL: &str = match option_env!("OTABOOT_VERSION_URL") {
    Some(url) => url,
    None => "https://example.com/firmware/version.txt",
};
const FIRMWARE_URL: &str = match option_env!("OTABOOT_FIRMWARE_URL") {
    Some(url) => url,
    None => "https://example.com/firmware/firmware.bin",
};
const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const WIFI_PASS: &str = match option_env!("WIFI_PASS") {
    Some(pass) => pass,
    None => "",
};

const HTTP_TIMEOUT_SECS: u64 = 30;
const HTTP_BUFFER_SIZE: usize = 4096;
const RESTART_DELAY_MS: u64 = 800;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = build_config();
    config.sanitize();
    info!(
        "booting firmware {} (update tls {})",
        config.update.current_version,
        config.update.tls.as_str()
    );

    let ota = match EspOta::new() {
        Ok(mut ota) => {
            if let Err(err) = ota.mark_running_slot_valid() {
                warn!("failed to mark running OTA slot valid: {err:?}");
            }
            log_slots(&ota);
            Some(ota)
        }
        Err(err) => {
            warn!("failed to acquire OTA, skipping update check: {err:?}");
            None
        }
    };

    // Keep the station alive for the program lifetime.
    let _wifi = match take_network().and_then(|(modem, sys_loop, nvs_partition)| {
        connect_wifi(modem, sys_loop, nvs_partition, &config.network)
    }) {
        Ok(wifi) => {
            if let Some(ota) = ota {
                run_boot_update(&config.update, ota);
            }
            Some(wifi)
        }
        Err(err) => {
            warn!("network unavailable, skipping update check: {err:#}");
            None
        }
    };

    blink_forever(config.liveness)
}

fn take_network() -> anyhow::Result<(Modem, EspSystemEventLoop, EspDefaultNvsPartition)> {
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;
    Ok((modem, sys_loop, nvs_partition))
}

fn build_config() -> DeviceConfig {
    let tls = match option_env!("OTABOOT_TLS_INSECURE") {
        Some("1") | Some("true") | Some("yes") => TlsVerification::Insecure,
        _ => TlsVerification::Verify,
    };

    DeviceConfig {
        update: UpdateConfig {
            current_version: CURRENT_VERSION.to_string(),
            version_url: VERSION_URL.to_string(),
            firmware_url: FIRMWARE_URL.to_string(),
            tls,
            ..UpdateConfig::default()
        },
        network: NetworkConfig {
            wifi_ssid: WIFI_SSID.to_string(),
            wifi_pass: WIFI_PASS.to_string(),
            association: AssociationPolicy::default(),
        },
        liveness: LivenessConfig::default(),
    }
}

fn run_boot_update(config: &UpdateConfig, ota: EspOta) {
    let mut conn = EspHttp::new(config.tls);
    let mut flash = EspFlash { ota };
    let mut restart = EspRestart;

    let outcome = BootUpdater::new(config, &mut conn, &mut flash, &mut restart).run();
    info!("boot update finished with {}", outcome.as_str());
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    if !network.has_station_credentials() {
        return Err(anyhow!("wifi credentials missing"));
    }

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);
    wifi.wifi_mut()
        .connect()
        .context("failed to begin wifi association")?;

    wait_until_associated(&mut WifiLink(&wifi), &network.association, thread::sleep)?;
    wifi.wait_netif_up().context("wifi netif did not come up")?;
    info!("wifi connected and netif up");
    Ok(wifi)
}

struct WifiLink<'a>(&'a BlockingWifi<EspWifi<'static>>);

impl Association for WifiLink<'_> {
    fn is_associated(&mut self) -> bool {
        self.0.is_connected().unwrap_or(false)
    }
}

fn blink_forever(liveness: LivenessConfig) -> ! {
    // SAFETY: the indicator GPIO is not claimed by any other driver.
    let pin = unsafe { AnyOutputPin::new(liveness.gpio as _) };
    let mut led = match PinDriver::output(pin) {
        Ok(driver) => Some(LedPin(driver)),
        Err(err) => {
            warn!("failed to claim GPIO{} for liveness: {err:?}", liveness.gpio);
            None
        }
    };

    let mut blinker = Blinker::new(liveness);
    loop {
        if let Some(led) = led.as_mut() {
            if let Err(err) = blinker.toggle(led) {
                warn!("liveness toggle failed: {err}");
            }
        }
        thread::sleep(blinker.half_period());
    }
}

struct LedPin(PinDriver<'static, AnyOutputPin, Output>);

impl IndicatorPin for LedPin {
    fn set_high(&mut self, high: bool) -> Result<(), PinError> {
        let level = if high { Level::High } else { Level::Low };
        self.0
            .set_level(level)
            .map_err(|err| PinError(format!("{err:?}")))
    }
}

/// One `EspHttpConnection` per request, dropped on release. Redirects are
/// followed by the caller, so the client is told not to.
struct EspHttp {
    tls: TlsVerification,
    conn: Option<EspHttpConnection>,
}

impl EspHttp {
    fn new(tls: TlsVerification) -> Self {
        Self { tls, conn: None }
    }

    fn client_configuration(&self) -> HttpClientConfiguration {
        match self.tls {
            TlsVerification::Verify => HttpClientConfiguration {
                timeout: Some(Duration::from_secs(HTTP_TIMEOUT_SECS)),
                buffer_size: Some(HTTP_BUFFER_SIZE),
                follow_redirects_policy: FollowRedirectsPolicy::FollowNone,
                crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                ..Default::default()
            },
            // Needs CONFIG_ESP_TLS_INSECURE and CONFIG_ESP_TLS_SKIP_SERVER_CERT_VERIFY.
            TlsVerification::Insecure => HttpClientConfiguration {
                timeout: Some(Duration::from_secs(HTTP_TIMEOUT_SECS)),
                buffer_size: Some(HTTP_BUFFER_SIZE),
                follow_redirects_policy: FollowRedirectsPolicy::FollowNone,
                skip_cert_common_name_check: true,
                ..Default::default()
            },
        }
    }
}

impl HttpConnection for EspHttp {
    fn get(&mut self, url: &str) -> Result<ResponseHead, TransportError> {
        self.conn = None;
        let mut conn = EspHttpConnection::new(&self.client_configuration())
            .map_err(|err| TransportError::request(url, format!("{err:?}")))?;
        conn.initiate_request(Method::Get, url, &[])
            .map_err(|err| TransportError::request(url, format!("{err:?}")))?;
        conn.initiate_response()
            .map_err(|err| TransportError::request(url, format!("{err:?}")))?;

        let content_length = conn
            .header("content-length")
            .or_else(|| conn.header("Content-Length"))
            .and_then(|value| value.trim().parse::<u64>().ok());
        let location = conn
            .header("location")
            .or_else(|| conn.header("Location"))
            .map(str::to_string);
        let head = ResponseHead {
            status: conn.status(),
            content_length,
            location,
        };

        self.conn = Some(conn);
        Ok(head)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| TransportError::Read("no response in flight".to_string()))?;
        conn.read(buf)
            .map_err(|err| TransportError::Read(format!("{err:?}")))
    }

    fn release(&mut self) {
        self.conn = None;
    }
}

struct EspFlash {
    ota: EspOta,
}

struct EspFlashSession<'a> {
    update: EspOtaUpdate<'a>,
}

impl FlashWriter for EspFlash {
    type Session<'a> = EspFlashSession<'a>;

    fn open(&mut self, expected_size: u64) -> Result<Self::Session<'_>, FlashError> {
        let partition =
            unsafe { esp_idf_svc::sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(FlashError::NoUpdateSlot(
                "partition table has no OTA update slot".to_string(),
            ));
        }
        // SAFETY: non-null partition pointers from ESP-IDF point into the static table.
        let capacity = u64::from(unsafe { (*partition).size });
        if expected_size > capacity {
            return Err(FlashError::InsufficientSpace {
                requested: expected_size,
                capacity,
            });
        }

        let update = self
            .ota
            .initiate_update()
            .map_err(|err| FlashError::NoUpdateSlot(format!("{err:?}")))?;
        info!("OTA session open for {expected_size} of {capacity} bytes");
        Ok(EspFlashSession { update })
    }
}

impl FlashSession for EspFlashSession<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, FlashError> {
        self.update
            .write(bytes)
            .map_err(|err| FlashError::Write(format!("{err:?}")))?;
        Ok(bytes.len())
    }

    fn abort(self) -> Result<(), FlashError> {
        self.update
            .abort()
            .map_err(|err| FlashError::Abort(format!("{err:?}")))
    }

    fn commit(self) -> Result<(), FlashError> {
        self.update
            .complete()
            .map_err(|err| FlashError::Commit(format!("{err:?}")))
    }
}

struct EspRestart;

impl Restart for EspRestart {
    fn restart(&mut self) {
        thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
        esp_idf_svc::hal::reset::restart();
    }
}

fn log_slots(ota: &EspOta) {
    info!(
        "OTA slots: running={} boot={} update={}",
        slot_label(ota.get_running_slot()),
        slot_label(ota.get_boot_slot()),
        slot_label(ota.get_update_slot())
    );
}

fn slot_label(slot: Result<Slot, EspError>) -> String {
    slot.map(|slot| slot.label.as_str().to_string())
        .unwrap_or_else(|err| format!("<{err}>"))
}
