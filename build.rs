use std::{
    env,
    error::Error,
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Deserialize;

#[derive(Deserialize)]
#[serde(default)]
struct RawConfig {
    wifi_ssid: String,
    wifi_psk: String,
    update_host: String,
    update_port: u16,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_psk: String::new(),
            update_host: String::new(),
            update_port: 80,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Tell Cargo to rerun if toml changes
    println!("cargo:rerun-if-changed=cfg.toml");

    // Station credentials are compiled in; the provisioning portal that
    // would otherwise collect them is an external mechanism. The file is
    // optional so host builds (cargo test) work without one.
    let raw: RawConfig = match fs::read_to_string("cfg.toml") {
        Ok(toml_str) => toml::from_str(&toml_str)?,
        Err(_) => RawConfig::default(),
    };

    let out_dir = env::var("OUT_DIR")?;
    let dest_path = Path::new(&out_dir).join("cfg.rs");
    let code = format!(
        "pub const WIFI_SSID: &str = {ssid:?};\n\
         pub const WIFI_PSK: &str = {psk:?};\n\
         pub const UPDATE_HOST: &str = {update_host:?};\n\
         pub const UPDATE_PORT: u16 = {update_port};\n",
        ssid = raw.wifi_ssid,
        psk = raw.wifi_psk,
        update_host = raw.update_host,
        update_port = raw.update_port,
    );
    fs::write(dest_path, code)?;

    // Compilation timestamp, reported at startup and on the console page.
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", format_utc(secs));

    Ok(())
}

/// Format seconds-since-epoch as `YYYY-MM-DD HH:MM:SS UTC`. Days-to-civil
/// is the usual Gregorian era arithmetic.
fn format_utc(secs: u64) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (h, m, s) = (rem / 3600, rem % 3600 / 60, rem % 60);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe + era * 400 + if month <= 2 { 1 } else { 0 };

    format!("{y:04}-{month:02}-{d:02} {h:02}:{m:02}:{s:02} UTC")
}
