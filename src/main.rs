#![no_std]
#![no_main]

use alloc::format;
use alloc::string::String;

use static_cell::StaticCell;

use embassy_executor::Spawner;
use embassy_net::{tcp::TcpSocket, IpListenEndpoint, Stack};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::Write;

use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{
    clock::CpuClock,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    rng::Rng,
    timer::timg::TimerGroup,
};
use esp_println::logger::init_logger;
use esp_radio::Controller;
use esp_storage::FlashStorage;
use log::{info, warn};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

extern crate alloc;

mod buttons;
mod storage;
mod transport;
#[cfg(feature = "ota")]
mod update;
mod wifi;

mod build_cfg {
    include!(concat!(env!("OUT_DIR"), "/cfg.rs"));
}

use esp32_event_counter::config::{ConfigStore, DeviceConfig};
use esp32_event_counter::console::{self, Request, Response};
use esp32_event_counter::constants::*;
use esp32_event_counter::report::{ReportEvent, ReportTarget, ReportingClient};
use esp32_event_counter::status::Indicator;

use buttons::Buttons;
use storage::FlashRegion;
use transport::TlsLink;
use wifi::Wifi;

esp_bootloader_esp_idf::esp_app_desc!();

/// Configuration, its store and the derived report target, shared
/// between the console and the main loop. The lock is held across
/// mutate and persist so concurrent requests cannot interleave.
struct ConsoleState {
    config: DeviceConfig,
    store: ConfigStore<FlashRegion>,
    target: ReportTarget,
}

static RADIO: StaticCell<Controller<'static>> = StaticCell::new();
static FLASH: StaticCell<Mutex<NoopRawMutex, FlashStorage<'static>>> = StaticCell::new();
static CONSOLE_STATE: StaticCell<Mutex<NoopRawMutex, ConsoleState>> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    init_logger(log::LevelFilter::Info);

    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Event counter {} ({})", VERSION, BUILD_TIMESTAMP);

    let rng = Rng::new();
    let mut seed = [0u8; 32];
    for chunk in seed.chunks_exact_mut(4) {
        chunk.copy_from_slice(&rng.random().to_le_bytes());
    }

    let mut status_led = Output::new(peripherals.GPIO2, Level::High, OutputConfig::default());
    let buttons = Buttons::new(
        Input::new(peripherals.GPIO25, InputConfig::default().with_pull(Pull::Up)),
        Input::new(peripherals.GPIO26, InputConfig::default().with_pull(Pull::Up)),
    );

    let flash: &'static Mutex<NoopRawMutex, FlashStorage<'static>> =
        FLASH.init(Mutex::new(FlashStorage::new(peripherals.FLASH)));

    let medium = FlashRegion::new(flash, CONFIG_FLASH_OFFSET, CONFIG_FLASH_CAPACITY);
    let mut store = ConfigStore::new(medium);
    store.render();
    let config = store.load();

    let radio: &'static Controller<'static> =
        RADIO.init(esp_radio::init().expect("Failed to initialize radio"));

    let wifi = Wifi::new(radio, peripherals.WIFI, rng, spawner, &config)
        .await
        .unwrap();

    wifi.connect().await.unwrap();

    #[cfg(feature = "ota")]
    {
        update::mark_current_valid(flash).await;
        if build_cfg::UPDATE_HOST.is_empty() {
            info!("No update host configured; firmware updates disabled");
        } else {
            spawner.must_spawn(update::update_task(
                wifi.stack,
                flash,
                config.device_name.clone(),
            ));
        }
    }

    let target = ReportTarget::new(&config);
    let state: &'static Mutex<NoopRawMutex, ConsoleState> =
        CONSOLE_STATE.init(Mutex::new(ConsoleState {
            config,
            store,
            target,
        }));

    let mut rx_buffer = [0u8; RX_BUFFER_SIZE];
    let mut tx_buffer = [0u8; TX_BUFFER_SIZE];
    let mut tls_read_buffer = [0u8; TLS_READ_BUFFER_SIZE];
    let mut tls_write_buffer = [0u8; TLS_WRITE_BUFFER_SIZE];

    let link = TlsLink::new(
        wifi.stack,
        ChaCha20Rng::from_seed(seed),
        REPORT_HOST,
        REPORT_PORT,
        &mut rx_buffer,
        &mut tx_buffer,
        &mut tls_read_buffer,
        &mut tls_write_buffer,
    );

    let mut client = ReportingClient::new(link);
    if client.connect_with_retries().await {
        client.verify();
    }

    spawner.must_spawn(console_task(wifi.stack, state));

    // Setup done; four quick blinks.
    for _ in 0..4 {
        status_led.set_low();
        Timer::after(Duration::from_millis(100)).await;
        status_led.set_high();
        Timer::after(Duration::from_millis(100)).await;
    }

    let mut indicator = Indicator::new();
    info!("Entering main loop");

    loop {
        for index in 1..=2usize {
            if !buttons.pressed(index) {
                continue;
            }

            let (target, event) = {
                let guard = state.lock().await;
                let tag = guard.config.button_tag(index).unwrap_or("");
                info!("Button {} pressed ({})", index, tag);
                (
                    guard.target.clone(),
                    ReportEvent::press(&guard.config.device_name, tag),
                )
            };

            // LED stays lit for the duration of the report attempt. On
            // failure it is left lit until the next indicator pulse,
            // which ends with the LED off again.
            status_led.set_low();
            if client.report(&target, &event).await {
                status_led.set_high();
            }

            Timer::after(Duration::from_millis(DEBOUNCE_MS)).await;
        }

        if indicator.due(Instant::now().as_millis()) {
            let healthy = client.is_healthy();
            indicator.record(Instant::now().as_millis(), healthy);
            status_led.set_low();
            Timer::after(Duration::from_millis(INDICATOR_PULSE_MS)).await;
            status_led.set_high();
        }

        Timer::after(Duration::from_millis(10)).await;
    }
}

#[embassy_executor::task]
async fn console_task(stack: Stack<'static>, state: &'static Mutex<NoopRawMutex, ConsoleState>) {
    let mut rx_buffer = [0; CONSOLE_RX_BUFFER_SIZE];
    let mut tx_buffer = [0; CONSOLE_TX_BUFFER_SIZE];

    info!("Console listening on port {}", CONSOLE_PORT);

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(10)));

        if let Err(e) = socket
            .accept(IpListenEndpoint {
                addr: None,
                port: CONSOLE_PORT,
            })
            .await
        {
            warn!("Console accept failed: {:?}", e);
            continue;
        }

        serve_console_client(&mut socket, stack, state).await;

        Timer::after(Duration::from_millis(50)).await;
        socket.close();
        Timer::after(Duration::from_millis(50)).await;
        socket.abort();
    }
}

async fn serve_console_client(
    socket: &mut TcpSocket<'_>,
    stack: Stack<'static>,
    state: &'static Mutex<NoopRawMutex, ConsoleState>,
) {
    let mut head = [0u8; CONSOLE_REQUEST_MAX];
    let mut total_read = 0;

    loop {
        if total_read == head.len() {
            warn!("Console request exceeds {} bytes", CONSOLE_REQUEST_MAX);
            let _ = socket.write_all(console::HTTP_431).await;
            return;
        }
        match socket.read(&mut head[total_read..]).await {
            Ok(0) => return,
            Ok(n) => {
                total_read += n;
                if head[..total_read].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(e) => {
                warn!("Console read failed: {:?}", e);
                return;
            }
        }
    }

    let head_text = String::from_utf8_lossy(&head[..total_read]);
    let local_ip = stack
        .config_v4()
        .map(|c| format!("{}", c.address.address()))
        .unwrap_or_default();

    let response = {
        let mut guard = state.lock().await;
        let shared = &mut *guard;
        match Request::parse(&head_text) {
            Some(request) => console::dispatch(
                &request,
                &mut shared.config,
                &mut shared.store,
                &mut shared.target,
                &local_ip,
            ),
            None => Response::NotFound,
        }
    };

    let _ = socket.write_all(response.header()).await;
    let _ = socket.write_all(response.body()).await;
    let _ = socket.flush().await;
}
