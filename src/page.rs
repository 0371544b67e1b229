use alloc::string::String;

/// Main console page. `%NAME%` tokens are filled in by [`render`].
pub const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>%DEVICE_NAME%</title>
<link rel="stylesheet" href="/style.css">
</head>
<body>
<h1>%DEVICE_NAME%</h1>
<p class="meta">Firmware %VERSION% (built %COMPILED_AT%) at %LOCAL_IP%</p>
<p class="meta">Spreadsheet script: %SCRIPT_STATUS%</p>
<div class="card">
<h2>Button tags</h2>
<form action="/setButton" method="get">
<label>Button 1 <input type="text" name="but_1" value="%BUT_1%"></label>
<label>Button 2 <input type="text" name="but_2" value="%BUT_2%"></label>
<input type="submit" value="Save">
</form>
</div>
<div class="card">
<h2>Device name</h2>
<form action="/setDeviceName" method="get">
<label>Name <input type="text" name="device_name" value="%DEVICE_NAME%"></label>
<input type="submit" value="Save">
</form>
</div>
<div class="card">
<h2>Script ID</h2>
<form action="/setGscriptID" method="get">
<label>ID <input type="text" name="gscriptID"></label>
<input type="submit" value="Save">
</form>
</div>
</body>
</html>
"#;

pub const STYLE_CSS: &str = r#"body {
  font-family: sans-serif;
  margin: 2em auto;
  max-width: 36em;
  padding: 0 1em;
  color: #222;
}
h1 { margin-bottom: 0; }
.meta { color: #666; margin: 0.2em 0; }
.card {
  border: 1px solid #ddd;
  border-radius: 6px;
  padding: 0.5em 1em 1em;
  margin: 1em 0;
}
.card h2 { font-size: 1em; }
label { display: block; margin: 0.5em 0; }
input[type="text"] { width: 100%; box-sizing: border-box; }
input[type="submit"] { margin-top: 0.5em; }
"#;

/// Replaces `%NAME%` tokens through `resolve`. Names are alphanumeric
/// plus underscore; the resolver decides what every name renders as,
/// returning empty for ones it does not know. `%%` renders a literal
/// percent sign, and stray percent signs pass through unchanged.
pub fn render<F>(template: &str, mut resolve: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) => {
                let token = &after[..end];
                if token.is_empty() {
                    out.push('%');
                    rest = &after[end + 1..];
                } else if token
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
                {
                    out.push_str(&resolve(token));
                    rest = &after[end + 1..];
                } else {
                    out.push('%');
                    rest = after;
                }
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::render;
    use alloc::string::String;

    #[test]
    fn substitutes_known_tokens() {
        let out = render("a %X% b %Y%", |name| match name {
            "X" => "1".into(),
            _ => String::new(),
        });
        assert_eq!(out, "a 1 b ");
    }

    #[test]
    fn double_percent_is_literal() {
        let out = render("100%% done", |_| unreachable!());
        assert_eq!(out, "100% done");
    }

    #[test]
    fn stray_percents_pass_through() {
        let out = render("50% off, 10% up", |_| String::from("nope"));
        assert_eq!(out, "50% off, 10% up");
    }
}
