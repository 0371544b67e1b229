use alloc::format;
use alloc::string::{String, ToString};

use embassy_net::{dns::DnsQueryType, tcp::TcpSocket, IpAddress, Stack};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;
use embedded_storage::nor_flash::NorFlash;
use esp_bootloader_esp_idf::{
    ota::OtaImageState, ota_updater::OtaUpdater, partitions::PARTITION_TABLE_MAX_LEN,
};
use esp_storage::FlashStorage;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use esp32_event_counter::constants::{
    FIRMWARE_CHECK_INTERVAL, OTA_CHUNK_BUFFER_SIZE, UPDATE_RX_BUFFER_SIZE, UPDATE_TX_BUFFER_SIZE,
    VERSION,
};

use crate::build_cfg::{UPDATE_HOST, UPDATE_PORT};

#[derive(Debug)]
pub enum Error {
    Connection,
    Info,
    Firmware,
    Ota,
}

/// Acknowledges the running image so the bootloader stops counting it
/// as a trial boot. Called once at startup; harmless on layouts
/// without OTA data.
pub async fn mark_current_valid(flash: &'static Mutex<NoopRawMutex, FlashStorage<'static>>) {
    let mut flash = flash.lock().await;
    let mut table_buffer = [0u8; PARTITION_TABLE_MAX_LEN];
    match OtaUpdater::new(&mut *flash, &mut table_buffer) {
        Ok(mut ota) => {
            ota.set_current_ota_state(OtaImageState::Valid).ok();
        }
        Err(e) => log::warn!("OTA state unavailable: {:?}", e),
    }
}

/// Polls the update host once an hour; a newer published version is
/// downloaded into the next partition and booted.
#[embassy_executor::task]
pub async fn update_task(
    stack: Stack<'static>,
    flash: &'static Mutex<NoopRawMutex, FlashStorage<'static>>,
    device: String,
) {
    loop {
        Timer::after(Duration::from_secs(FIRMWARE_CHECK_INTERVAL)).await;
        if let Err(e) = check(stack, flash, &device).await {
            log::error!("Firmware update check failed: {:?}", e);
        }
    }
}

async fn check(
    stack: Stack<'static>,
    flash: &'static Mutex<NoopRawMutex, FlashStorage<'static>>,
    device: &str,
) -> Result<(), Error> {
    let mut rx_buffer = [0u8; UPDATE_RX_BUFFER_SIZE];
    let mut tx_buffer = [0u8; UPDATE_TX_BUFFER_SIZE];
    let device_param = utf8_percent_encode(device, NON_ALPHANUMERIC).to_string();

    // Version probe; the response body carries version, crc32 and size
    // on three lines.
    let mut socket = connect_update_host(stack, &mut rx_buffer, &mut tx_buffer).await?;
    http_get(&mut socket, &format!("/version?device={}", device_param)).await?;

    let mut buf = [0u8; 256];
    let mut total_read = 0;
    loop {
        if total_read == buf.len() {
            break;
        }
        match socket.read(&mut buf[total_read..]).await {
            Ok(0) => break,
            Ok(n) => total_read += n,
            Err(_) => break,
        }
    }
    socket.close();
    drop(socket);

    let body_start = find_header_end(&buf[..total_read]).ok_or(Error::Info)?;
    let mut lines = buf[body_start..total_read].split(|&b| b == b'\n');

    let remote_text = core::str::from_utf8(lines.next().ok_or(Error::Info)?)
        .map_err(|_| Error::Info)?
        .trim();
    let current = parse_version(VERSION).ok_or(Error::Info)?;
    let remote = parse_version(remote_text).ok_or_else(|| {
        log::error!("Unparseable remote version '{}'", remote_text);
        Error::Info
    })?;

    if remote <= current {
        log::info!(
            "Remote version {} is not newer than {}. Skipping update.",
            remote_text,
            VERSION
        );
        return Ok(());
    }

    let _crc32 = parse_number::<u32>(lines.next().ok_or(Error::Info)?)?;
    let size = parse_number::<usize>(lines.next().ok_or(Error::Info)?)?;

    log::info!(
        "Upgrading from {} to {} ({} bytes)",
        VERSION,
        remote_text,
        size
    );

    // Fetch the image itself.
    let mut socket = connect_update_host(stack, &mut rx_buffer, &mut tx_buffer).await?;
    http_get(&mut socket, &format!("/firmware?device={}", device_param)).await?;

    let mut buf = [0u8; 256];
    let mut total_read = 0;
    let mut body_start = None;
    loop {
        let n = socket
            .read(&mut buf[total_read..])
            .await
            .map_err(|_| Error::Firmware)?;
        if n == 0 {
            break;
        }
        total_read += n;
        if let Some(pos) = find_header_end(&buf[..total_read]) {
            body_start = Some(pos);
            break;
        }
        if total_read == buf.len() {
            return Err(Error::Firmware);
        }
    }
    let body_start = body_start.ok_or(Error::Firmware)?;

    // Config saves report busy while this lock is held; the device
    // reboots at the end of a successful update anyway.
    let mut flash_guard = flash.lock().await;
    let mut table_buffer = [0u8; PARTITION_TABLE_MAX_LEN];
    let mut ota = OtaUpdater::new(&mut *flash_guard, &mut table_buffer).map_err(|_| Error::Ota)?;
    let (mut partition, _part_type) = ota.next_partition().map_err(|_| Error::Ota)?;

    // Flash erase blocks for seconds at a time; chunk it and yield so
    // the watchdog and WiFi tasks keep running.
    let erase_len = ((size + 4095) & !4095) as u32;
    log::info!("Erasing OTA partition ({} bytes)...", erase_len);
    const ERASE_CHUNK_SIZE: u32 = 65536;
    let mut erased: u32 = 0;
    while erased < erase_len {
        let chunk = core::cmp::min(ERASE_CHUNK_SIZE, erase_len - erased);
        partition.erase(erased, erased + chunk).map_err(|e| {
            log::error!("Flash erase failed at offset {}: {:?}", erased, e);
            Error::Ota
        })?;
        erased += chunk;
        Timer::after(Duration::from_millis(10)).await;
    }

    // ESP32 flash wants 4-byte aligned writes; carry the unaligned tail
    // over to the next chunk and pad the last one with the erased state.
    let mut write_buf = [0u8; OTA_CHUNK_BUFFER_SIZE];
    let leftover = &buf[body_start..total_read];
    write_buf[..leftover.len()].copy_from_slice(leftover);
    let mut buffered = leftover.len();

    let mut bytes_written = 0usize;
    let mut progress_decile = 0usize;
    loop {
        let n = match socket.read(&mut write_buf[buffered..]).await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Firmware read ended: {:?}", e);
                0
            }
        };

        if n == 0 {
            if buffered > 0 {
                let padded = (buffered + 3) & !3;
                write_buf[buffered..padded].fill(0xFF);
                partition
                    .write(bytes_written as u32, &write_buf[..padded])
                    .map_err(|e| {
                        log::error!("Flash write failed at offset {}: {:?}", bytes_written, e);
                        Error::Ota
                    })?;
                bytes_written += buffered;
            }
            break;
        }

        buffered += n;
        let aligned = buffered & !3;
        if aligned > 0 {
            partition
                .write(bytes_written as u32, &write_buf[..aligned])
                .map_err(|e| {
                    log::error!("Flash write failed at offset {}: {:?}", bytes_written, e);
                    Error::Ota
                })?;
            bytes_written += aligned;
            write_buf.copy_within(aligned..buffered, 0);
            buffered -= aligned;
        }

        if size > 0 && bytes_written * 10 / size > progress_decile {
            progress_decile = bytes_written * 10 / size;
            log::info!("Firmware download: {}%", progress_decile * 10);
            Timer::after(Duration::from_millis(10)).await;
        }
    }

    if bytes_written != size {
        log::error!("Size mismatch: wrote {} bytes, expected {}", bytes_written, size);
        return Err(Error::Firmware);
    }

    ota.activate_next_partition().map_err(|e| {
        log::error!("Failed to activate next partition: {:?}", e);
        Error::Ota
    })?;
    ota.set_current_ota_state(OtaImageState::New).map_err(|e| {
        log::error!("Failed to set OTA state to New: {:?}", e);
        Error::Ota
    })?;

    log::info!("Firmware update complete. Rebooting...");
    Timer::after(Duration::from_millis(1_000)).await;
    esp_hal::system::software_reset();
}

async fn connect_update_host<'s>(
    stack: Stack<'static>,
    rx_buffer: &'s mut [u8],
    tx_buffer: &'s mut [u8],
) -> Result<TcpSocket<'s>, Error> {
    let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
    socket.set_timeout(Some(Duration::from_secs(30)));

    let addr = resolve(stack, UPDATE_HOST).await?;
    socket
        .connect((addr, UPDATE_PORT))
        .await
        .map_err(|_| Error::Connection)?;
    Ok(socket)
}

async fn resolve(stack: Stack<'static>, host: &str) -> Result<IpAddress, Error> {
    if let Ok(addr) = host.parse::<IpAddress>() {
        return Ok(addr);
    }
    stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|_| Error::Connection)?
        .first()
        .copied()
        .ok_or(Error::Connection)
}

async fn http_get(socket: &mut TcpSocket<'_>, path: &str) -> Result<(), Error> {
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, UPDATE_HOST
    );
    socket
        .write_all(request.as_bytes())
        .await
        .map_err(|_| Error::Connection)?;
    socket.flush().await.map_err(|_| Error::Connection)
}

fn parse_number<T: core::str::FromStr>(bytes: &[u8]) -> Result<T, Error> {
    core::str::from_utf8(bytes)
        .map_err(|_| Error::Info)?
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Info)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// `major.minor.patch`, with an optional `v` prefix. Pre-release tags
/// are not used by this firmware's versioning.
fn parse_version(text: &str) -> Option<(u32, u32, u32)> {
    let text = text.trim();
    let text = text.strip_prefix('v').unwrap_or(text);
    let mut parts = text.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
