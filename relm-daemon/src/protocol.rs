use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};

pub const CMD_STATUS: &str = "status";
pub const CMD_PASS: &str = "pass";
pub const CMD_METRICS: &str = "metrics";
pub const CMD_STOP: &str = "stop";

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(socket: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        });
    }

    let mut stream = UnixStream::connect(socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            io_err(socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Query status, retrying briefly while a freshly started daemon binds.
pub fn request_status(socket: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new(CMD_STATUS);

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(socket, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(socket: &Path) -> Result<(), DaemonError> {
    let response = send_request(socket, &DaemonRequest::new(CMD_STOP))?;
    response_into_data(response).map(|_| ())
}

/// Run a pass now and return its summary.
pub fn request_pass(socket: &Path) -> Result<Value, DaemonError> {
    let response = send_request(socket, &DaemonRequest::new(CMD_PASS))?;
    response_into_data(response)
}

/// Counters in Prometheus text exposition format.
pub fn request_metrics(socket: &Path) -> Result<String, DaemonError> {
    let response = send_request(socket, &DaemonRequest::new(CMD_METRICS))?;
    let data = response_into_data(response)?;
    data.get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DaemonError::Protocol("metrics response missing 'text'".to_string()))
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_socket_reports_not_running() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("relm.sock");
        let err = request_stop(&socket).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg == "boom"));
    }

    #[test]
    fn responses_omit_absent_fields() {
        let encoded = serde_json::to_value(DaemonResponse::ok(json!({"passes": 2}))).unwrap();
        assert_eq!(encoded, json!({"ok": true, "data": {"passes": 2}}));
    }
}
