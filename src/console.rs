use alloc::string::String;

use log::{info, warn};
use percent_encoding::percent_decode_str;

use crate::config::{
    ConfigMedium, ConfigStore, DeviceConfig, KEY_BUTTON_TAGS, KEY_DEVICE_NAME, KEY_SCRIPT_ID,
};
use crate::page;
use crate::report::ReportTarget;

pub const HTTP_200_HTML: &[u8] =
    b"HTTP/1.0 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n";
pub const HTTP_200_CSS: &[u8] =
    b"HTTP/1.0 200 OK\r\nContent-Type: text/css\r\nConnection: close\r\n\r\n";
pub const HTTP_404: &[u8] = b"HTTP/1.0 404 Not Found\r\nConnection: close\r\n\r\n";
pub const HTTP_431: &[u8] = b"HTTP/1.0 431 Headers Too Large\r\nConnection: close\r\n\r\n";

/// Request line of an incoming console request. Only the head is ever
/// parsed; these requests carry no body.
#[derive(Debug)]
pub struct Request<'a> {
    pub method: &'a str,
    pub path: &'a str,
    query: &'a str,
}

impl<'a> Request<'a> {
    pub fn parse(head: &'a str) -> Option<Request<'a>> {
        let line = head.lines().next()?;
        let mut parts = line.split(' ');
        let method = parts.next()?;
        let target = parts.next()?;
        if method.is_empty() || !target.starts_with('/') {
            return None;
        }
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        Some(Request {
            method,
            path,
            query,
        })
    }

    /// Decoded value of a query parameter, or `None` when absent.
    pub fn param(&self, name: &str) -> Option<String> {
        self.query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then(|| decode_component(value))
        })
    }
}

/// Undoes form encoding: `+` for spaces, `%XX` for everything else.
fn decode_component(raw: &str) -> String {
    let mut spaced = String::with_capacity(raw.len());
    for c in raw.chars() {
        spaced.push(if c == '+' { ' ' } else { c });
    }
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[derive(Debug)]
pub enum Response {
    Html(String),
    Css(&'static str),
    NotFound,
}

impl Response {
    pub fn header(&self) -> &'static [u8] {
        match self {
            Response::Html(_) => HTTP_200_HTML,
            Response::Css(_) => HTTP_200_CSS,
            Response::NotFound => HTTP_404,
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            Response::Html(body) => body.as_bytes(),
            Response::Css(body) => body.as_bytes(),
            Response::NotFound => b"",
        }
    }
}

/// Routes a parsed request to its handler. Every configuration route
/// answers with a freshly rendered main page so the browser always
/// shows the state it just changed.
pub fn dispatch<M: ConfigMedium>(
    request: &Request<'_>,
    config: &mut DeviceConfig,
    store: &mut ConfigStore<M>,
    target: &mut ReportTarget,
    local_ip: &str,
) -> Response {
    if request.method != "GET" {
        info!("console: unsupported method {}", request.method);
        return Response::NotFound;
    }
    match request.path {
        "/" => Response::Html(render_index(config, local_ip)),
        "/style.css" => Response::Css(page::STYLE_CSS),
        "/setButton" => set_button(request, config, store, local_ip),
        "/setGscriptID" => set_script_id(request, config, store, target, local_ip),
        "/setDeviceName" => set_device_name(request, config, store, local_ip),
        _ => {
            info!("console: no route for {}", request.path);
            Response::NotFound
        }
    }
}

fn render_index(config: &DeviceConfig, local_ip: &str) -> String {
    page::render(page::INDEX_TEMPLATE, |name| match name {
        "DEVICE_NAME" => config.device_name.clone(),
        "VERSION" => String::from(config.version),
        "COMPILED_AT" => String::from(config.compiled_at),
        "BUT_1" => config.button_tags[0].clone(),
        "BUT_2" => config.button_tags[1].clone(),
        "LOCAL_IP" => String::from(local_ip),
        "SCRIPT_STATUS" => String::from(if config.script_configured() {
            "configured"
        } else {
            "not configured"
        }),
        _ => String::new(),
    })
}

/// `/setButton?but_1=<tag>&but_2=<tag>`. Either parameter may be
/// omitted or left empty to keep the current tag.
fn set_button<M: ConfigMedium>(
    request: &Request<'_>,
    config: &mut DeviceConfig,
    store: &mut ConfigStore<M>,
    local_ip: &str,
) -> Response {
    for index in 1..=KEY_BUTTON_TAGS.len() {
        let name = ["but_1", "but_2"][index - 1];
        let Some(tag) = request.param(name) else {
            continue;
        };
        if tag.is_empty() {
            warn!("console: refusing empty tag for button {}", index);
            continue;
        }
        match config.set_button_tag(index, &tag) {
            Ok(()) => {
                info!("console: button {} now reports as {}", index, tag);
                store.save(KEY_BUTTON_TAGS[index - 1], &tag);
            }
            Err(e) => warn!("console: {:?}", e),
        }
    }
    Response::Html(render_index(config, local_ip))
}

/// `/setGscriptID?gscriptID=<id>`. The report target is rebuilt right
/// here so the next report already uses the new path.
fn set_script_id<M: ConfigMedium>(
    request: &Request<'_>,
    config: &mut DeviceConfig,
    store: &mut ConfigStore<M>,
    target: &mut ReportTarget,
    local_ip: &str,
) -> Response {
    match request.param("gscriptID") {
        Some(id) if !id.is_empty() => {
            info!("console: script id now {}", id);
            config.script_id = id;
            store.save(KEY_SCRIPT_ID, &config.script_id);
            target.rebuild(config);
        }
        _ => warn!("console: refusing empty script id"),
    }
    Response::Html(render_index(config, local_ip))
}

/// `/setDeviceName?device_name=<name>`. The hostname advertised over
/// DHCP stays whatever it was at boot; only reports pick the new name
/// up immediately.
fn set_device_name<M: ConfigMedium>(
    request: &Request<'_>,
    config: &mut DeviceConfig,
    store: &mut ConfigStore<M>,
    local_ip: &str,
) -> Response {
    match request.param("device_name") {
        Some(name) if !name.is_empty() => {
            info!("console: device name now {}", name);
            config.device_name = name;
            store.save(KEY_DEVICE_NAME, &config.device_name);
        }
        _ => warn!("console: refusing empty device name"),
    }
    Response::Html(render_index(config, local_ip))
}

#[cfg(test)]
mod tests {
    use super::Request;

    #[test]
    fn parses_path_and_query() {
        let request = Request::parse("GET /setButton?but_1=milk&but_2= HTTP/1.1\r\n\r\n")
            .expect("well-formed request");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/setButton");
        assert_eq!(request.param("but_1").as_deref(), Some("milk"));
        assert_eq!(request.param("but_2").as_deref(), Some(""));
        assert_eq!(request.param("but_3"), None);
    }

    #[test]
    fn decodes_form_encoded_values() {
        let request =
            Request::parse("GET /setDeviceName?device_name=Coffee+corner%2F2 HTTP/1.1\r\n\r\n")
                .expect("well-formed request");
        assert_eq!(
            request.param("device_name").as_deref(),
            Some("Coffee corner/2")
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Request::parse("").is_none());
        assert!(Request::parse("GET\r\n").is_none());
        assert!(Request::parse("GET nothing HTTP/1.1").is_none());
    }
}
