//! Request dispatch: one op string in, one response out.
//!
//! Every handler is stateless given the shared collaborators (history store,
//! current config snapshot, host bridge). Faults escaping a handler are
//! normalized into an `ACTION_FAILED` envelope at this boundary; nothing ever
//! propagates to the transport as a raw error.

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use serde_json::{Value, json};

use super::bridge::{HostTask, UiBridge};
use super::protocol::{ErrorCode, Request, Response};
use crate::actions::{ActionContext, run_action};
use crate::config::SharedConfig;
use crate::history::{HistoryStore, Which};

#[derive(Clone)]
pub struct Dispatcher {
    history: Arc<Mutex<HistoryStore>>,
    config: Arc<SharedConfig>,
    bridge: UiBridge,
}

impl Dispatcher {
    pub fn new(
        history: Arc<Mutex<HistoryStore>>,
        config: Arc<SharedConfig>,
        bridge: UiBridge,
    ) -> Self {
        Self {
            history,
            config,
            bridge,
        }
    }

    /// Transport entry point: parse one framed line and dispatch it.
    pub fn dispatch_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.dispatch(&request),
            Err(e) => Response::err(format!("invalid json: {e}"), ErrorCode::InvalidArg),
        }
    }

    pub fn dispatch(&self, request: &Request) -> Response {
        if request.op.is_empty() {
            return Response::err("op missing", ErrorCode::InvalidArg);
        }
        let result = match request.op.as_str() {
            "ui.show" => self.handle_ui_show(),
            "selection.get" => self.handle_selection_get(request),
            "selection.set" => self.handle_selection_set(request),
            "history.list" => self.handle_history_list(request),
            "history.apply" => self.handle_history_apply(request),
            "history.swap" => self.handle_history_swap(request),
            "action.run" => self.handle_action_run(request),
            "trigger" => self.handle_trigger(request),
            other => {
                return Response::err(format!("unsupported op: {other}"), ErrorCode::InvalidOp);
            }
        };
        match result {
            Ok(response) => response,
            Err(e) => Response::err(e.to_string(), ErrorCode::ActionFailed),
        }
    }

    fn which_of(request: &Request) -> Which {
        Which::parse(request.get_str("which").unwrap_or("clipboard"))
    }

    fn enqueue(&self, task: HostTask) -> Result<()> {
        if !self.bridge.enqueue(task) {
            bail!("host context unavailable");
        }
        Ok(())
    }

    fn handle_ui_show(&self) -> Result<Response> {
        self.enqueue(HostTask::PresentWindow)?;
        Ok(Response::ok(json!({"op": "ui.show"})))
    }

    fn handle_selection_get(&self, request: &Request) -> Result<Response> {
        let which = Self::which_of(request);
        // The one genuinely synchronous cross-thread read; empty on timeout.
        let text = self.bridge.read_selection(which);
        Ok(Response::ok(json!({
            "op": "selection.get",
            "which": which.as_str(),
            "text": text,
        })))
    }

    fn handle_selection_set(&self, request: &Request) -> Result<Response> {
        let which = Self::which_of(request);
        let text = request.get_str("text").unwrap_or_default().to_string();
        let len = text.chars().count();
        self.enqueue(HostTask::SetSelection { which, text })?;
        // Accepted, not necessarily applied yet.
        Ok(Response::ok(json!({
            "op": "selection.set",
            "which": which.as_str(),
            "len": len,
        })))
    }

    fn handle_history_list(&self, request: &Request) -> Result<Response> {
        let which = Self::which_of(request);
        let limit = match request.get("limit") {
            None | Some(Value::Null) => None,
            Some(value) => match parse_int(value) {
                Some(n) => Some(n.max(0) as usize),
                None => {
                    return Ok(Response::err(
                        "limit must be an integer",
                        ErrorCode::InvalidArg,
                    ));
                }
            },
        };
        let items = self.history.lock().unwrap().list(which, limit);
        Ok(Response::ok(json!({
            "op": "history.list",
            "which": which.as_str(),
            "items": items,
        })))
    }

    fn handle_history_apply(&self, request: &Request) -> Result<Response> {
        let which = Self::which_of(request);
        let index = match request.get("index").and_then(parse_int) {
            Some(i) => i,
            None => {
                return Ok(Response::err(
                    "index must be an integer",
                    ErrorCode::InvalidArg,
                ));
            }
        };
        let entry = if index < 0 {
            None
        } else {
            self.history
                .lock()
                .unwrap()
                .get(which, index as usize)
                .map(str::to_string)
        };
        let Some(text) = entry else {
            return Ok(Response::err(
                format!("no history entry at index {index}"),
                ErrorCode::NotFound,
            ));
        };
        let len = text.chars().count();
        self.enqueue(HostTask::SetSelection { which, text })?;
        Ok(Response::ok(json!({
            "op": "history.apply",
            "which": which.as_str(),
            "index": index,
            "len": len,
        })))
    }

    fn handle_history_swap(&self, request: &Request) -> Result<Response> {
        let which = Self::which_of(request);
        let applied = {
            let mut history = self.history.lock().unwrap();
            if !history.swap_last_two(which) {
                return Ok(Response::err(
                    "need at least two history entries",
                    ErrorCode::NotFound,
                ));
            }
            history.get(which, 0).unwrap_or_default().to_string()
        };
        let len = applied.chars().count();
        self.enqueue(HostTask::SetSelection {
            which,
            text: applied.clone(),
        })?;
        Ok(Response::ok(json!({
            "op": "history.swap",
            "which": which.as_str(),
            "applied": applied,
            "len": len,
        })))
    }

    fn handle_action_run(&self, request: &Request) -> Result<Response> {
        let name = match request.get_str("name") {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return Ok(Response::err("name is required", ErrorCode::InvalidArg)),
        };
        let snapshot = self.config.current();
        let Some(action) = snapshot.actions.find(&name) else {
            return Ok(Response::err(
                format!("unknown action: {name}"),
                ErrorCode::NotFound,
            ));
        };

        let from = request
            .get("source")
            .and_then(|s| s.get("from"))
            .and_then(Value::as_str)
            .unwrap_or("clipboard");
        let (text, selection_type) = match from {
            // Literal text counts as clipboard input for placeholders.
            "text" => (
                request.get_str("text").unwrap_or_default().to_string(),
                Which::Clipboard,
            ),
            "primary" => (self.bridge.read_selection(Which::Primary), Which::Primary),
            _ => (
                self.bridge.read_selection(Which::Clipboard),
                Which::Clipboard,
            ),
        };

        let ctx = ActionContext::new(text, selection_type)
            .with_settings(snapshot.settings.as_map().clone())
            .with_extra("selection.type", selection_type.as_str());

        match run_action(action, &ctx) {
            Ok(message) => Ok(Response::ok(json!({
                "op": "action.run",
                "name": name,
                "result": message,
            }))),
            Err(message) => Ok(Response::err(message, ErrorCode::ActionFailed)),
        }
    }

    fn handle_trigger(&self, request: &Request) -> Result<Response> {
        let cmd = match request.get_str("cmd") {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => return Ok(Response::err("cmd is required", ErrorCode::InvalidArg)),
        };
        let snapshot = self.config.current();
        let Some(name) = snapshot.actions.triggers.get(&cmd) else {
            return Ok(Response::err(
                format!("unknown trigger: {cmd}"),
                ErrorCode::NotFound,
            ));
        };

        // Re-enter the dispatcher as action.run so its semantics (including
        // NOT_FOUND for an alias pointing at a missing action) apply as-is.
        let mut fields = request.fields.clone();
        fields.remove("cmd");
        fields.insert("name".to_string(), Value::String(name.clone()));
        let rewritten = Request {
            op: "action.run".to_string(),
            fields,
        };
        Ok(self.dispatch(&rewritten))
    }
}

fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActionsConfig, ConfigSnapshot};
    use crate::history::DEFAULT_HISTORY_MAX;
    use crate::host::{HostLoop, MemoryHost, SelectionHost};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    struct Stack {
        dispatcher: Dispatcher,
        host: MemoryHost,
        history: Arc<Mutex<HistoryStore>>,
        shutdown: Arc<AtomicBool>,
        thread: Option<std::thread::JoinHandle<()>>,
    }

    impl Stack {
        fn with_actions(actions_json: Value) -> Self {
            let actions: ActionsConfig = serde_json::from_value(actions_json).unwrap();
            let snapshot = ConfigSnapshot {
                actions,
                ..Default::default()
            };
            let config = Arc::new(SharedConfig::with_snapshot(snapshot));
            let history = Arc::new(Mutex::new(HistoryStore::new(DEFAULT_HISTORY_MAX)));
            let host = MemoryHost::default();
            let shutdown = Arc::new(AtomicBool::new(false));
            let (bridge, tasks) = UiBridge::channel();
            let host_loop = HostLoop::new(
                Box::new(host.clone()),
                tasks,
                history.clone(),
                config.clone(),
                shutdown.clone(),
            )
            .with_poll_interval(Duration::from_secs(3600));
            let thread = std::thread::spawn(move || host_loop.run());
            let dispatcher = Dispatcher::new(history.clone(), config, bridge);
            Self {
                dispatcher,
                host,
                history,
                shutdown,
                thread: Some(thread),
            }
        }

        fn new() -> Self {
            Self::with_actions(json!({}))
        }
    }

    impl Drop for Stack {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::SeqCst);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn missing_op_is_invalid_arg() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch_line(r#"{"which":"clipboard"}"#);
        assert!(!resp.ok);
        assert_eq!(resp.code, Some(ErrorCode::InvalidArg));
        assert_eq!(resp.error.as_deref(), Some("op missing"));
    }

    #[test]
    fn unknown_op_is_invalid_op() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch(&Request::new("selection.nuke"));
        assert_eq!(resp.code, Some(ErrorCode::InvalidOp));
    }

    #[test]
    fn malformed_line_is_invalid_arg() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch_line("not json at all");
        assert!(!resp.ok);
        assert_eq!(resp.code, Some(ErrorCode::InvalidArg));
        assert!(resp.error.unwrap().starts_with("invalid json"));
    }

    #[test]
    fn ui_show_returns_immediately_and_presents() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch(&Request::new("ui.show"));
        assert!(resp.ok);
        assert_eq!(resp.data.unwrap()["op"], "ui.show");
        assert!(wait_until(|| stack.host.presented() == 1));
    }

    #[test]
    fn selection_set_then_get_round_trips() {
        let stack = Stack::new();
        let set = stack.dispatcher.dispatch(&Request::with_fields(
            "selection.set",
            json!({"which": "clipboard", "text": "hello"}),
        ));
        assert!(set.ok);
        assert_eq!(set.data.unwrap()["len"], 5);

        // selection.set is fire-and-forget; poll until applied
        assert!(wait_until(|| {
            stack.host.current(Which::Clipboard) == "hello"
        }));

        let get = stack.dispatcher.dispatch(&Request::with_fields(
            "selection.get",
            json!({"which": "clipboard"}),
        ));
        assert!(get.ok);
        assert_eq!(get.data.unwrap()["text"], "hello");
    }

    #[test]
    fn selection_get_times_out_to_empty_text() {
        // Dispatcher whose host loop never runs: reads must time out, not hang.
        let config = Arc::new(SharedConfig::with_snapshot(ConfigSnapshot::default()));
        let history = Arc::new(Mutex::new(HistoryStore::new(DEFAULT_HISTORY_MAX)));
        let (bridge, _tasks) = UiBridge::channel();
        let dispatcher = Dispatcher::new(history, config, bridge);

        let started = Instant::now();
        let resp = dispatcher.dispatch(&Request::with_fields(
            "selection.get",
            json!({"which": "primary"}),
        ));
        assert!(resp.ok);
        assert_eq!(resp.data.unwrap()["text"], "");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn history_list_rejects_non_integer_limit() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "history.list",
            json!({"which": "clipboard", "limit": "x"}),
        ));
        assert!(!resp.ok);
        assert_eq!(resp.code, Some(ErrorCode::InvalidArg));
    }

    #[test]
    fn history_list_returns_newest_first() {
        let stack = Stack::new();
        {
            let mut history = stack.history.lock().unwrap();
            history.add(Which::Clipboard, "old");
            history.add(Which::Clipboard, "new");
        }
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "history.list",
            json!({"which": "clipboard"}),
        ));
        assert!(resp.ok);
        assert_eq!(resp.data.unwrap()["items"], json!(["new", "old"]));
    }

    #[test]
    fn history_list_accepts_string_integer_limit() {
        let stack = Stack::new();
        {
            let mut history = stack.history.lock().unwrap();
            history.add(Which::Clipboard, "a");
            history.add(Which::Clipboard, "b");
        }
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "history.list",
            json!({"which": "clipboard", "limit": "1"}),
        ));
        assert!(resp.ok);
        assert_eq!(resp.data.unwrap()["items"], json!(["b"]));
    }

    #[test]
    fn history_apply_out_of_range_is_not_found() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "history.apply",
            json!({"which": "clipboard", "index": 3}),
        ));
        assert!(!resp.ok);
        assert_eq!(resp.code, Some(ErrorCode::NotFound));
    }

    #[test]
    fn history_apply_sets_selection_to_entry() {
        let stack = Stack::new();
        {
            let mut history = stack.history.lock().unwrap();
            history.add(Which::Primary, "older");
            history.add(Which::Primary, "newer");
        }
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "history.apply",
            json!({"which": "primary", "index": 1}),
        ));
        assert!(resp.ok);
        let data = resp.data.unwrap();
        assert_eq!(data["index"], 1);
        assert_eq!(data["len"], 5);
        assert!(wait_until(|| stack.host.current(Which::Primary) == "older"));
    }

    #[test]
    fn history_apply_rejects_missing_index() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "history.apply",
            json!({"which": "clipboard"}),
        ));
        assert_eq!(resp.code, Some(ErrorCode::InvalidArg));
    }

    #[test]
    fn history_swap_needs_two_entries() {
        let stack = Stack::new();
        {
            stack.history.lock().unwrap().add(Which::Clipboard, "only");
        }
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "history.swap",
            json!({"which": "clipboard"}),
        ));
        assert!(!resp.ok);
        assert_eq!(resp.code, Some(ErrorCode::NotFound));
        // unchanged on failure
        assert_eq!(
            stack.history.lock().unwrap().get(Which::Clipboard, 0),
            Some("only")
        );
    }

    #[test]
    fn history_swap_applies_new_top_entry() {
        let stack = Stack::new();
        {
            let mut history = stack.history.lock().unwrap();
            history.add(Which::Clipboard, "first");
            history.add(Which::Clipboard, "second");
        }
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "history.swap",
            json!({"which": "clipboard"}),
        ));
        assert!(resp.ok);
        let data = resp.data.unwrap();
        assert_eq!(data["applied"], "first");
        assert_eq!(
            stack.history.lock().unwrap().list(Which::Clipboard, None),
            vec!["first", "second"]
        );
        assert!(wait_until(|| stack.host.current(Which::Clipboard) == "first"));
    }

    #[test]
    fn action_run_unknown_name_is_not_found() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "action.run",
            json!({"name": "missing"}),
        ));
        assert_eq!(resp.code, Some(ErrorCode::NotFound));
    }

    #[test]
    fn action_run_without_name_is_invalid_arg() {
        let stack = Stack::new();
        let resp = stack
            .dispatcher
            .dispatch(&Request::with_fields("action.run", json!({})));
        assert_eq!(resp.code, Some(ErrorCode::InvalidArg));
    }

    #[test]
    fn action_run_with_literal_text_expands_placeholder() {
        let stack = Stack::with_actions(json!({
            "actions": [
                {"name": "echo", "type": "shell", "command": "/bin/echo", "args": ["{text}"]}
            ]
        }));
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "action.run",
            json!({"name": "echo", "source": {"from": "text"}, "text": "hi"}),
        ));
        assert!(resp.ok, "{resp:?}");
        let data = resp.data.unwrap();
        assert_eq!(data["name"], "echo");
        assert_eq!(data["result"], "hi");
    }

    #[test]
    fn action_run_reads_clipboard_by_default() {
        let stack = Stack::with_actions(json!({
            "actions": [
                {"name": "echo", "type": "shell", "command": "/bin/echo", "args": ["{text}"]}
            ]
        }));
        let mut host = stack.host.clone();
        host.set_selection(Which::Clipboard, "from clipboard");
        let resp = stack
            .dispatcher
            .dispatch(&Request::with_fields("action.run", json!({"name": "echo"})));
        assert!(resp.ok);
        assert_eq!(resp.data.unwrap()["result"], "from clipboard");
    }

    #[test]
    fn action_run_failure_maps_to_action_failed() {
        let stack = Stack::with_actions(json!({
            "actions": [
                {"name": "fail", "type": "shell", "command": "/bin/false"}
            ]
        }));
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "action.run",
            json!({"name": "fail", "source": {"from": "text"}, "text": ""}),
        ));
        assert!(!resp.ok);
        assert_eq!(resp.code, Some(ErrorCode::ActionFailed));
        assert_eq!(resp.error.as_deref(), Some("exit 1"));
    }

    #[test]
    fn trigger_without_configured_aliases_is_not_found() {
        let stack = Stack::new();
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "trigger",
            json!({"cmd": "missing-alias"}),
        ));
        assert!(!resp.ok);
        assert_eq!(resp.code, Some(ErrorCode::NotFound));
    }

    #[test]
    fn trigger_resolves_alias_through_action_run() {
        let stack = Stack::with_actions(json!({
            "actions": [
                {"name": "echo", "type": "shell", "command": "/bin/echo", "args": ["{text}"]}
            ],
            "triggers": {"prompt": "echo"}
        }));
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "trigger",
            json!({"cmd": "prompt", "source": {"from": "text"}, "text": "via alias"}),
        ));
        assert!(resp.ok, "{resp:?}");
        let data = resp.data.unwrap();
        assert_eq!(data["op"], "action.run");
        assert_eq!(data["result"], "via alias");
    }

    #[test]
    fn trigger_to_missing_action_reuses_action_run_not_found() {
        let stack = Stack::with_actions(json!({
            "triggers": {"prompt": "ghost"}
        }));
        let resp = stack
            .dispatcher
            .dispatch(&Request::with_fields("trigger", json!({"cmd": "prompt"})));
        assert!(!resp.ok);
        assert_eq!(resp.code, Some(ErrorCode::NotFound));
        assert!(resp.error.unwrap().contains("ghost"));
    }

    #[test]
    fn selection_type_placeholder_reflects_source() {
        let stack = Stack::with_actions(json!({
            "actions": [
                {"name": "which", "type": "shell", "command": "/bin/echo",
                 "args": ["{selection.type}"]}
            ]
        }));
        let resp = stack.dispatcher.dispatch(&Request::with_fields(
            "action.run",
            json!({"name": "which", "source": {"from": "primary"}}),
        ));
        assert!(resp.ok);
        assert_eq!(resp.data.unwrap()["result"], "primary");
    }
}
