use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

use crate::ipc::client;
use crate::ipc::protocol::{Request, Response};
use crate::platform;

/// wbridge - Selection/Shortcut Bridge
#[derive(Parser, Debug)]
#[command(name = "wbridge")]
#[command(version)]
#[command(about = "Bridge clipboard/primary selections to configured actions")]
#[command(long_about = "wbridge tracks the clipboard and primary selections, keeps a bounded
history per channel, and runs declarative actions (HTTP or shell) against the
current selection text.

A long-running instance ('wbridge serve') owns the selections and listens on a
per-user Unix socket; every other subcommand is a short-lived client that
performs exactly one request/response exchange against it.")]
pub struct Cli {
    /// Client request timeout in seconds
    #[arg(long, default_value = "3")]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the bridge application (host loop + IPC server)
    Serve,
    /// UI commands
    Ui {
        #[command(subcommand)]
        action: UiAction,
    },
    /// Selection operations
    Selection {
        #[command(subcommand)]
        action: SelectionAction,
    },
    /// History operations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Trigger an action alias, or run a named action directly
    Trigger {
        /// Trigger alias (e.g., prompt, command)
        cmd: Option<String>,
        /// Run this named action instead of resolving an alias
        #[arg(long)]
        name: Option<String>,
        /// Use the current clipboard as input (default)
        #[arg(long, conflicts_with_all = ["from_primary", "text"])]
        from_clipboard: bool,
        /// Use the current primary selection as input
        #[arg(long, conflicts_with_all = ["from_clipboard", "text"])]
        from_primary: bool,
        /// Use literal text instead of reading a selection
        #[arg(long, conflicts_with_all = ["from_clipboard", "from_primary"])]
        text: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum UiAction {
    /// Bring the bridge window to the foreground
    Show,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SelectionAction {
    /// Get current selection text
    Get {
        #[arg(long, default_value = "clipboard", value_parser = ["clipboard", "primary"])]
        which: String,
    },
    /// Set selection text
    Set {
        #[arg(long, default_value = "clipboard", value_parser = ["clipboard", "primary"])]
        which: String,
        /// Literal text to set
        #[arg(long)]
        text: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum HistoryAction {
    /// List recent history entries
    List {
        #[arg(long, default_value = "clipboard", value_parser = ["clipboard", "primary"])]
        which: String,
        /// Maximum number of entries to return
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Apply a history entry to its selection (0 = latest)
    Apply {
        #[arg(long, default_value = "clipboard", value_parser = ["clipboard", "primary"])]
        which: String,
        #[arg(long)]
        index: i64,
    },
    /// Swap the last two history entries and apply the new top one
    Swap {
        #[arg(long, default_value = "clipboard", value_parser = ["clipboard", "primary"])]
        which: String,
    },
}

/// Build the wire request for a client subcommand. `Serve` has no request;
/// `trigger` without an alias or a name is a usage error.
pub fn build_request(command: &Commands) -> Result<Request, String> {
    match command {
        Commands::Serve => Err("serve does not use IPC".to_string()),
        Commands::Ui {
            action: UiAction::Show,
        } => Ok(Request::new("ui.show")),
        Commands::Selection { action } => match action {
            SelectionAction::Get { which } => Ok(Request::with_fields(
                "selection.get",
                json!({"which": which}),
            )),
            SelectionAction::Set { which, text } => Ok(Request::with_fields(
                "selection.set",
                json!({"which": which, "text": text}),
            )),
        },
        Commands::History { action } => match action {
            HistoryAction::List { which, limit } => {
                let mut fields = json!({"which": which});
                if let Some(limit) = limit {
                    fields["limit"] = json!(limit);
                }
                Ok(Request::with_fields("history.list", fields))
            }
            HistoryAction::Apply { which, index } => Ok(Request::with_fields(
                "history.apply",
                json!({"which": which, "index": index}),
            )),
            HistoryAction::Swap { which } => Ok(Request::with_fields(
                "history.swap",
                json!({"which": which}),
            )),
        },
        Commands::Trigger {
            cmd,
            name,
            from_primary,
            text,
            ..
        } => {
            let source = if *from_primary {
                json!({"from": "primary"})
            } else if text.is_some() {
                json!({"from": "text"})
            } else {
                json!({"from": "clipboard"})
            };
            let (op, key, value) = if let Some(name) = name {
                ("action.run", "name", name.clone())
            } else if let Some(cmd) = cmd {
                ("trigger", "cmd", cmd.clone())
            } else {
                return Err(
                    "trigger: either provide a positional CMD or use --name for a named action"
                        .to_string(),
                );
            };
            let mut fields = json!({key: value, "source": source});
            if let Some(text) = text {
                fields["text"] = json!(text);
            }
            Ok(Request::with_fields(op, fields))
        }
    }
}

/// Print a response the way the CLI reports results: pretty `data` (or `OK`)
/// on stdout for success, the error string on stderr otherwise. Returns the
/// process exit code.
pub fn print_response(response: &Response) -> i32 {
    if response.ok {
        match &response.data {
            Some(data) => println!(
                "{}",
                serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
            ),
            None => println!("OK"),
        }
    } else {
        eprintln!("{}", response.error.as_deref().unwrap_or("error"));
    }
    client::exit_code(response)
}

/// Execute one client subcommand against the running bridge.
pub async fn run_ipc_command(command: &Commands, timeout: Duration) -> i32 {
    let request = match build_request(command) {
        Ok(request) => request,
        Err(message) => {
            eprintln!("{message}");
            return 2;
        }
    };
    let response = client::request(&platform::socket_path(), &request, timeout).await;
    print_response(&response)
}
