use anyhow::Result;
use jfrlens::LensError;
use serde::Serialize;
use serde_json::Value;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    /// Prints one command result: a single JSON line, or a titled tree.
    pub fn print_result<T: Serialize>(&self, command: &str, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let mut value = serde_json::to_value(value)?;
        let failed = take_failed_inputs(&mut value);
        println!(
            "{} {}",
            self.style("jfrlens", "36;1"),
            self.style(command, "37;1")
        );
        println!("{}", render_value(&value, 2));
        for (path, message) in failed {
            self.print_warning(&format!("skipped {path}: {message}"));
        }
        Ok(())
    }

    pub fn print_error(&self, err: &anyhow::Error) {
        let code = err
            .downcast_ref::<LensError>()
            .map(error_code)
            .unwrap_or("error");
        let msg = err.to_string();
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": code,
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "code": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn error_code(err: &LensError) -> &'static str {
    match err {
        LensError::File { source, .. } => error_code(source),
        LensError::Config(_) | LensError::Toml(_) => "config",
        LensError::Io(_) => "io",
        LensError::Json(_) | LensError::Decode(_) | LensError::Zip(_) => "decode",
        LensError::CollapsedParse { .. } => "collapsed_parse",
        LensError::InvalidArgument(_) => "invalid_argument",
        LensError::NoData(_) => "no_data",
        LensError::UnknownSession(_) => "unknown_session",
    }
}

/// Pulls `failedInputs` out of a result so pretty output can warn instead.
fn take_failed_inputs(value: &mut Value) -> Vec<(String, String)> {
    let Some(Value::Array(items)) = value.as_object_mut().and_then(|m| m.remove("failedInputs"))
    else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let field = |name: &str| {
                item.get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            (field("path"), field("message"))
        })
        .collect()
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    let pad = " ".repeat(indent);
    if items.is_empty() {
        return format!("{pad}[]");
    }

    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    let pad = " ".repeat(indent);
    if map.is_empty() {
        return format!("{pad}{{}}");
    }

    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Array(items) if items.is_empty() => out.push_str(&format!("{pad}{key}: []\n")),
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!(
                    "{pad}{key}:\n{}\n",
                    render_value(value, indent + 2)
                ));
            }
            _ => out.push_str(&format!(
                "{pad}{key}: {}\n",
                render_value(value, indent + 2)
            )),
        }
    }
    out.trim_end().to_string()
}
