#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::Timer;
use esp_hal::{
    clock::CpuClock,
    gpio::{Input, InputConfig, Pull},
    timer::timg::TimerGroup,
};
use esp_radio::wifi::{ClientConfig, ModeConfig};
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;
use wavedial_core::{
    selection::{SelectionStore, resolve_stored_index},
    session::{
        RecoveryAction, Tuner, USER_SWITCH_SETTLE_MS, WIFI_RETRY_DELAY_SECS, recovery_for,
    },
    station::Catalog,
};
use wavedial_hal_esp32s3::{
    audio::Mp3Pipeline,
    input::rotary::{DialConfig, RotaryDial},
    storage::flash_selection::FlashSelectionStore,
};

#[path = "main/net.rs"]
mod net;
#[path = "main/session.rs"]
mod session;

const TITLE: &str = "wavedial";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const ENCODER_DIRECTION_INVERTED: bool = false;

const WIFI_SSID: &str = env!(
    "WAVEDIAL_WIFI_SSID",
    "Set WAVEDIAL_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "WAVEDIAL_WIFI_PASSWORD",
    "Set WAVEDIAL_WIFI_PASSWORD in your environment before building/flashing."
);

const STATIONS_JSON: &[u8] = include_bytes!("../../stations.json");

static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// Fatal-boot idle: no sensible way to keep going, so keep the serial log
/// readable and wait for a power cycle.
async fn halt() -> ! {
    loop {
        Timer::after_secs(1).await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: {TITLE} {VERSION} starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 98304);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // No station list means nothing to play, ever: fatal.
    let catalog = match Catalog::from_json(STATIONS_JSON) {
        Ok(catalog) => catalog,
        Err(err) => {
            info!("station list unusable: {err:?}; halting");
            halt().await
        }
    };
    info!("station catalog loaded: {} stations", catalog.len());

    // Selection storage degrades to a volatile station 0 when the flash
    // layout has no usable partition.
    let mut store = match FlashSelectionStore::new() {
        Ok(store) => Some(store),
        Err(err) => {
            info!("selection storage unavailable ({err:?}); selection will not survive reboots");
            None
        }
    };

    let raw_selection = match store.load() {
        Ok(raw) => raw,
        Err(err) => {
            warn!("selection load failed: {err:?}");
            None
        }
    };
    let resolved = resolve_stored_index(raw_selection, catalog.len());
    if resolved.repaired {
        info!("stored selection unusable; repairing to station 0");
        if let Err(err) = store.save(0) {
            warn!("selection repair write failed: {err:?}");
        }
    }
    info!("resuming station {}", resolved.index);

    // Rotary encoder wiring: S1=GPIO11 S2=GPIO12 KEY=GPIO10.
    // KEY has a pull-up on the encoder board; no internal pull.
    let quadrature_cfg = InputConfig::default().with_pull(Pull::Up);
    let dial_s1 = Input::new(peripherals.GPIO11, quadrature_cfg);
    let dial_s2 = Input::new(peripherals.GPIO12, quadrature_cfg);
    let dial_key = Input::new(peripherals.GPIO10, InputConfig::default());
    let mut dial = RotaryDial::new(
        peripherals.PCNT,
        dial_s1,
        dial_s2,
        dial_key,
        DialConfig::default().with_direction_inverted(ENCODER_DIRECTION_INVERTED),
    );

    // I2S wiring to the MAX98357A: BCLK=GPIO8 LRCK=GPIO9 DIN=GPIO7.
    let mut pipeline = match Mp3Pipeline::new(
        peripherals.I2S0,
        peripherals.DMA_CH0,
        peripherals.GPIO8,
        peripherals.GPIO9,
        peripherals.GPIO7,
    ) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            // Same recovery as a mid-session hardware fault: restart and
            // try again with persisted state intact.
            info!("i2s init failed: {err:?}; restarting in {WIFI_RETRY_DELAY_SECS}s");
            Timer::after_secs(WIFI_RETRY_DELAY_SECS).await;
            esp_hal::system::software_reset();
        }
    };

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            info!("esp-radio init failed: {err:?}");
            halt().await
        }
    };

    let (mut wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                info!("wifi peripheral init failed: {err:?}");
                halt().await
            }
        };

    let client_config = ClientConfig::default()
        .with_ssid(WIFI_SSID.into())
        .with_password(WIFI_PASSWORD.into());
    if let Err(err) = wifi_controller.set_config(&ModeConfig::Client(client_config)) {
        info!("wifi mode config failed: {err:?}");
        halt().await
    }

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        0x77A7_ED1A_4D10_5EED,
    );

    let mut tuner = Tuner::new(catalog.len(), resolved.index);

    info!("I2S pins: BCLK=GPIO8 LRCK=GPIO9 DIN=GPIO7");
    info!("Encoder pins: S1=GPIO11 S2=GPIO12 KEY=GPIO10");
    info!("heap after radio bring-up: {}", esp_alloc::HEAP.stats());

    let net_future = net_runner.run();
    let radio_future = async {
        loop {
            if !net::ensure_connected(&mut wifi_controller, stack).await {
                info!("no wifi; retrying in {WIFI_RETRY_DELAY_SECS}s");
                Timer::after_secs(WIFI_RETRY_DELAY_SECS).await;
                continue;
            }

            let station = match catalog.get(tuner.current_index()) {
                Some(station) => station,
                None => {
                    warn!("selection drifted out of range; resetting to station 0");
                    tuner = Tuner::new(catalog.len(), 0);
                    continue;
                }
            };

            let outcome =
                session::run_session(stack, station, &mut tuner, &mut dial, &mut store, &mut pipeline)
                    .await;

            match recovery_for(outcome) {
                RecoveryAction::Settle => {
                    info!("user switch; tuning station {}", tuner.current_index());
                    Timer::after_millis(USER_SWITCH_SETTLE_MS).await;
                }
                RecoveryAction::SoftReset => {
                    // The supervisor-reload analog: restart the control flow
                    // from the top with persisted storage intact, so the
                    // device resumes on the same station.
                    info!("stream failed; soft reset with selection preserved");
                    let raw = match store.load() {
                        Ok(raw) => raw,
                        Err(err) => {
                            warn!("selection load failed: {err:?}");
                            None
                        }
                    };
                    let resolved = resolve_stored_index(raw, catalog.len());
                    if resolved.repaired
                        && let Err(err) = store.save(0)
                    {
                        warn!("selection repair write failed: {err:?}");
                    }
                    tuner = Tuner::new(catalog.len(), resolved.index);
                }
            }
        }
    };

    let _ = embassy_futures::join::join(net_future, radio_future).await;
    unreachable!()
}
