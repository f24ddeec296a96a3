//! Declarative actions: HTTP calls and local process execution.
//!
//! An action is looked up by name from the loaded configuration, expanded
//! against an [`ActionContext`] (placeholder substitution), and executed.
//! Runners report `(ok, message)` as a `Result<String, String>` and never
//! propagate an error past this module.

use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::config::SettingsMap;
use crate::history::Which;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// One configured action. The `kind` string is validated at run time so a
/// single misconfigured entry fails with a message instead of poisoning the
/// whole config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,

    // http fields
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub json: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub body_is_text: bool,

    // shell fields
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub use_shell: bool,
}

/// Resolved input for one action invocation. Built fresh per request and not
/// mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub text: String,
    pub selection_type: &'static str,
    pub settings: SettingsMap,
    pub extra: HashMap<String, String>,
}

impl ActionContext {
    pub fn new(text: impl Into<String>, which: Which) -> Self {
        Self {
            text: text.into(),
            selection_type: which.as_str(),
            settings: SettingsMap::new(),
            extra: HashMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: SettingsMap) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Replace `{text}`, `{config.<section>.<key>}` and `{<extra-key>}` in one
/// string.
pub fn expand(s: &str, ctx: &ActionContext) -> String {
    let mut out = s.replace("{text}", &ctx.text);
    for (section, kv) in &ctx.settings {
        for (key, value) in kv {
            out = out.replace(&format!("{{config.{section}.{key}}}"), value);
        }
    }
    for (key, value) in &ctx.extra {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Expansion applied recursively into strings nested in arrays and objects.
pub fn expand_value(value: &Value, ctx: &ActionContext) -> Value {
    match value {
        Value::String(s) => Value::String(expand(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Execute one action against one context.
pub fn run_action(action: &Action, ctx: &ActionContext) -> Result<String, String> {
    match action.kind.to_ascii_lowercase().as_str() {
        "http" => run_http(action, ctx),
        "shell" => run_shell(action, ctx),
        "" => Err("unsupported action type: missing".to_string()),
        other => Err(format!("unsupported action type: {other}")),
    }
}

fn run_http(action: &Action, ctx: &ActionContext) -> Result<String, String> {
    let method = action
        .method
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or("GET")
        .to_ascii_uppercase();
    let url = match action.url.as_deref() {
        Some(u) if !u.is_empty() => expand(u, ctx),
        _ => return Err("http action missing url".to_string()),
    };

    let headers = action.headers.as_ref().map(|v| expand_value(v, ctx));
    let params = action.params.as_ref().map(|v| expand_value(v, ctx));
    let json_body = action.json.as_ref().map(|v| expand_value(v, ctx));
    let mut data_body = action.data.as_ref().map(|v| expand_value(v, ctx));
    if method != "GET" && action.body_is_text && json_body.is_none() && data_body.is_none() {
        data_body = Some(Value::String(ctx.text.clone()));
    }

    let agent = ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build();
    let mut request = agent.request(&method, &url);
    if let Some(Value::Object(map)) = &headers {
        for (key, value) in map {
            request = request.set(key, &value_as_string(value));
        }
    }
    if let Some(Value::Object(map)) = &params {
        for (key, value) in map {
            request = request.query(key, &value_as_string(value));
        }
    }

    let result = if method == "GET" {
        request.call()
    } else if let Some(body) = json_body {
        request.send_json(body)
    } else {
        match data_body {
            Some(Value::String(s)) => request.send_string(&s),
            Some(Value::Object(map)) => {
                let pairs: Vec<(String, String)> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), value_as_string(v)))
                    .collect();
                let form: Vec<(&str, &str)> = pairs
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                request.send_form(&form)
            }
            Some(other) => request.send_string(&other.to_string()),
            None => request.call(),
        }
    };

    match result {
        Ok(response) => Ok(format!("http {method} {url} -> {}", response.status())),
        Err(ureq::Error::Status(status, _)) => Err(format!("http {method} {url} -> {status}")),
        Err(e) => Err(e.to_string()),
    }
}

fn run_shell(action: &Action, ctx: &ActionContext) -> Result<String, String> {
    let command = match action.command.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => expand(c, ctx),
        _ => return Err("shell action missing command".to_string()),
    };
    let args: Vec<String> = action.args.iter().map(|a| expand(a, ctx)).collect();

    let output = if action.use_shell {
        // Caller is responsible for quoting inside `command` itself; the
        // expanded args are appended shell-quoted for convenience.
        let mut full = command.clone();
        for arg in &args {
            full.push(' ');
            full.push_str(&shell_quote(arg));
        }
        Command::new("sh").arg("-c").arg(&full).output()
    } else {
        Command::new(&command).args(&args).output()
    };

    match output {
        Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
            Ok(if stdout.is_empty() {
                "ok".to_string()
            } else {
                stdout
            })
        }
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            Err(if stderr.is_empty() {
                format!("exit {}", out.status.code().unwrap_or(-1))
            } else {
                stderr
            })
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Minimal POSIX single-quote escaping for `use_shell` argument joining.
fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}
