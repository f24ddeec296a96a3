use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::{ErrorCode, Request, Response};

/// Overall bound on one connect + request + response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// IPC client for one request/response exchange with the running bridge.
#[derive(Debug)]
pub struct IpcClient {
    reader: BufReader<UnixStream>,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    pub async fn send_request(&mut self, request: &Request) -> io::Result<()> {
        let mut json = serde_json::to_string(request)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        json.push('\n');

        self.reader.get_mut().write_all(json.as_bytes()).await?;
        self.reader.get_mut().flush().await?;

        Ok(())
    }

    /// Read one newline-terminated response. A zero-byte close surfaces as
    /// `UnexpectedEof`, unparseable bytes as `InvalidData`.
    pub async fn recv_response(&mut self) -> io::Result<Response> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;

        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed connection",
            ));
        }

        serde_json::from_str(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub async fn call(&mut self, request: &Request) -> io::Result<Response> {
        self.send_request(request).await?;
        self.recv_response().await
    }
}

/// One-shot exchange with every transport failure mapped to a local response
/// envelope; no error escapes. A server-sent `ok:false` passes through
/// verbatim.
pub async fn request(socket_path: &Path, request: &Request, timeout: Duration) -> Response {
    let exchange = async {
        let mut client = IpcClient::connect(socket_path).await?;
        client.call(request).await
    };
    match tokio::time::timeout(timeout, exchange).await {
        Err(_) => Response::err("timeout", ErrorCode::Timeout),
        Ok(Err(e)) => match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                Response::err("server not running", ErrorCode::NotRunning)
            }
            io::ErrorKind::TimedOut => Response::err("timeout", ErrorCode::Timeout),
            io::ErrorKind::UnexpectedEof => Response::failure("empty response"),
            io::ErrorKind::InvalidData => Response::failure(format!("invalid json response: {e}")),
            _ => Response::failure(e.to_string()),
        },
        Ok(Ok(response)) => response,
    }
}

/// CLI exit code mapping:
/// 0 success, 2 invalid arguments, 1 transport-level failure
/// (not running / timeout / no code), 3 any other server-side failure.
pub fn exit_code(response: &Response) -> i32 {
    if response.ok {
        return 0;
    }
    match response.code {
        Some(ErrorCode::InvalidArg) => 2,
        Some(ErrorCode::NotRunning) | Some(ErrorCode::Timeout) | None => 1,
        Some(_) => 3,
    }
}
