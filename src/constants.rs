/// Current firmware version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compilation timestamp, generated by build.rs
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");

/// Remote endpoint host the reports are pushed to
pub const REPORT_HOST: &str = "script.google.com";
/// Remote endpoint port
pub const REPORT_PORT: u16 = 443;

/// Pinned SHA-1 fingerprint of the endpoint leaf certificate. Checked
/// advisory-only after connecting; a mismatch is logged, never enforced.
pub const REPORT_FINGERPRINT: &str = "F0 5C 74 77 3F 6B 25 D7 3B 66 4D 43 2F 7E BC 5B E9 28 86 AD";

/// Fixed prefix of the Apps Script execution path
pub const SCRIPT_PATH_PREFIX: &str = "/macros/s/";
/// Fixed suffix of the Apps Script execution path
pub const SCRIPT_PATH_SUFFIX: &str = "/exec";

/// TLS connect attempts at startup before degrading to no-reporting mode
pub const CONNECT_ATTEMPTS: u32 = 5;

/// Status indicator sample period while the link is healthy (ms)
pub const INDICATOR_HEALTHY_MS: u64 = 5_000;
/// Status indicator sample period while the link is unhealthy (ms)
pub const INDICATOR_UNHEALTHY_MS: u64 = 200;
/// Width of the indicator LED pulse (ms)
pub const INDICATOR_PULSE_MS: u64 = 10;

/// Hold-off after a reported button press (ms)
pub const DEBOUNCE_MS: u64 = 100;

/// Give up on a single Wi-Fi association after this long
pub const WIFI_CONNECT_TIMEOUT_SECS: u64 = 15;
/// Pause between Wi-Fi reconnect attempts (ms)
pub const WIFI_RECONNECT_DELAY_MS: u64 = 5_000;

/// Console listen port
pub const CONSOLE_PORT: u16 = 80;
/// Upper bound for a console request head (request line + headers)
pub const CONSOLE_REQUEST_MAX: usize = 1024;

/// Size of the heap in DRAM
pub const HEAP_SIZE: usize = 72 * 1024;

/// Size of the TCP socket receive buffer for the reporting link
pub const RX_BUFFER_SIZE: usize = 4096;
/// Size of the TCP socket transmit buffer for the reporting link
pub const TX_BUFFER_SIZE: usize = 4096;

/// TLS record read buffer; embedded-tls needs a full 16 KiB record plus
/// overhead on the read side
pub const TLS_READ_BUFFER_SIZE: usize = 16_640;
/// TLS record write buffer
pub const TLS_WRITE_BUFFER_SIZE: usize = 4096;

/// Console socket receive buffer
pub const CONSOLE_RX_BUFFER_SIZE: usize = 1024;
/// Console socket transmit buffer
pub const CONSOLE_TX_BUFFER_SIZE: usize = 4096;

/// Flash offset of the configuration document region (the nvs slot of
/// the stock partition layout, repurposed)
pub const CONFIG_FLASH_OFFSET: u32 = 0x9000;
/// Capacity of the configuration document region, one flash sector
pub const CONFIG_FLASH_CAPACITY: usize = 4096;

/// Interval in seconds between firmware update checks (3600 = 1 hour)
pub const FIRMWARE_CHECK_INTERVAL: u64 = 3600;

/// Buffer size for OTA firmware update chunks
pub const OTA_CHUNK_BUFFER_SIZE: usize = 2048;

/// Socket buffer sizes for the firmware update connection
pub const UPDATE_RX_BUFFER_SIZE: usize = 2048;
pub const UPDATE_TX_BUFFER_SIZE: usize = 1024;
