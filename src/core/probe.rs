use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Commands the stdio probe is willing to spawn. Mirrors the usual MCP
/// launchers; anything else is refused up front.
const ALLOWED_STDIO_COMMANDS: &[&str] = &[
    "npx", "uvx", "node", "python", "python3", "docker", "deno", "bun",
];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeSpec {
    pub name: String,
    pub transport: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub allow_insecure: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProbeOutcome {
    pub name: String,
    pub reachable: bool,
    pub transport: String,
    pub target: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeOutcome {
    fn unreachable(spec: &ProbeSpec, target: &str, detail: String) -> Self {
        Self {
            name: spec.name.clone(),
            reachable: false,
            transport: spec.transport.clone(),
            target: target.to_string(),
            status: "error".to_string(),
            latency_ms: None,
            detail: Some(detail),
        }
    }
}

pub fn clamp_timeout(requested: Option<u64>) -> Duration {
    match requested {
        Some(secs) if secs > 0 => Duration::from_secs(secs).min(MAX_TIMEOUT),
        _ => DEFAULT_TIMEOUT,
    }
}

/// Probe one configured server. Defined to never fail: every outcome is a
/// result entry, with `reachable = false` and `detail` set on any error.
pub async fn probe_server(spec: &ProbeSpec, timeout: Duration) -> ProbeOutcome {
    match spec.transport.as_str() {
        "sse" => {
            let Some(url) = spec.url.as_deref().filter(|u| !u.trim().is_empty()) else {
                return ProbeOutcome::unreachable(spec, "", "url is required for sse".to_string());
            };
            probe_sse(spec, url, timeout).await
        }
        "stdio" => {
            let Some(command) = spec.command.as_deref().filter(|c| !c.trim().is_empty()) else {
                return ProbeOutcome::unreachable(
                    spec,
                    "",
                    "command is required for stdio".to_string(),
                );
            };
            probe_stdio(spec, command, timeout).await
        }
        other => ProbeOutcome::unreachable(
            spec,
            "",
            format!("unsupported transport '{}', expected sse or stdio", other),
        ),
    }
}

async fn probe_sse(spec: &ProbeSpec, url: &str, timeout: Duration) -> ProbeOutcome {
    let client = match reqwest::Client::builder()
        .danger_accept_invalid_certs(spec.allow_insecure)
        .timeout(timeout)
        .build()
    {
        Ok(c) => c,
        Err(e) => return ProbeOutcome::unreachable(spec, url, e.to_string()),
    };

    let started = Instant::now();
    match client.get(url).send().await {
        Ok(resp) => {
            let latency = started.elapsed().as_millis() as u64;
            let status = resp.status();
            ProbeOutcome {
                name: spec.name.clone(),
                reachable: !status.is_server_error(),
                transport: spec.transport.clone(),
                target: url.to_string(),
                status: status.as_u16().to_string(),
                latency_ms: Some(latency),
                detail: if status.is_server_error() {
                    Some(format!("server responded {}", status))
                } else {
                    None
                },
            }
        }
        Err(e) => ProbeOutcome::unreachable(spec, url, e.to_string()),
    }
}

fn stdio_command_allowed(command: &str) -> bool {
    let base = std::path::Path::new(command)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(command);
    ALLOWED_STDIO_COMMANDS.contains(&base)
}

/// Spawn the server command, send the MCP initialize request on stdin and
/// wait for any stdout line. A server that answers within the deadline is
/// reachable regardless of what it said.
async fn probe_stdio(spec: &ProbeSpec, command_line: &str, timeout: Duration) -> ProbeOutcome {
    let mut parts = command_line.split_whitespace();
    let Some(program) = parts.next() else {
        return ProbeOutcome::unreachable(spec, command_line, "empty command".to_string());
    };
    if !stdio_command_allowed(program) {
        return ProbeOutcome::unreachable(
            spec,
            command_line,
            format!(
                "command '{}' is not allowed. Allowed: {}",
                program,
                ALLOWED_STDIO_COMMANDS.join(", ")
            ),
        );
    }

    let started = Instant::now();
    let spawned = Command::new(program)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(c) => c,
        Err(e) => return ProbeOutcome::unreachable(spec, command_line, e.to_string()),
    };

    let handshake = async {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| "failed to open stdin".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "failed to open stdout".to_string())?;

        let init = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "taskhub", "version": env!("CARGO_PKG_VERSION") }
            }
        });
        stdin
            .write_all(format!("{}\n", init).as_bytes())
            .await
            .map_err(|e| e.to_string())?;
        stdin.flush().await.map_err(|e| e.to_string())?;

        let mut lines = BufReader::new(stdout).lines();
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("stdio probe [{}] answered: {}", spec.name, line);
                Ok(())
            }
            Ok(None) => Err("server exited without output".to_string()),
            Err(e) => Err(e.to_string()),
        }
    };

    let outcome = match tokio::time::timeout(timeout, handshake).await {
        Ok(Ok(())) => ProbeOutcome {
            name: spec.name.clone(),
            reachable: true,
            transport: spec.transport.clone(),
            target: command_line.to_string(),
            status: "ok".to_string(),
            latency_ms: Some(started.elapsed().as_millis() as u64),
            detail: None,
        },
        Ok(Err(detail)) => ProbeOutcome::unreachable(spec, command_line, detail),
        Err(_) => ProbeOutcome::unreachable(
            spec,
            command_line,
            format!("no response within {:?}", timeout),
        ),
    };
    let _ = child.kill().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(transport: &str, url: Option<&str>, command: Option<&str>) -> ProbeSpec {
        ProbeSpec {
            name: "srv".to_string(),
            transport: transport.to_string(),
            url: url.map(String::from),
            command: command.map(String::from),
            allow_insecure: false,
        }
    }

    #[test]
    fn timeout_is_clamped() {
        assert_eq!(clamp_timeout(None), DEFAULT_TIMEOUT);
        assert_eq!(clamp_timeout(Some(0)), DEFAULT_TIMEOUT);
        assert_eq!(clamp_timeout(Some(5)), Duration::from_secs(5));
        assert_eq!(clamp_timeout(Some(600)), MAX_TIMEOUT);
    }

    #[test]
    fn allow_list_checks_the_basename() {
        assert!(stdio_command_allowed("npx"));
        assert!(stdio_command_allowed("/usr/local/bin/node"));
        assert!(!stdio_command_allowed("bash"));
        assert!(!stdio_command_allowed("/bin/rm"));
    }

    #[tokio::test]
    async fn unsupported_transport_yields_entry_not_error() {
        let out = probe_server(&spec("websocket", None, None), DEFAULT_TIMEOUT).await;
        assert!(!out.reachable);
        assert!(out.detail.unwrap().contains("unsupported transport"));
    }

    #[tokio::test]
    async fn missing_target_fields_yield_entries() {
        let out = probe_server(&spec("sse", None, None), DEFAULT_TIMEOUT).await;
        assert!(!out.reachable);
        assert!(out.detail.unwrap().contains("url is required"));

        let out = probe_server(&spec("stdio", None, None), DEFAULT_TIMEOUT).await;
        assert!(!out.reachable);
        assert!(out.detail.unwrap().contains("command is required"));
    }

    #[tokio::test]
    async fn disallowed_stdio_command_is_refused() {
        let out = probe_server(
            &spec("stdio", None, Some("bash -c 'echo hi'")),
            DEFAULT_TIMEOUT,
        )
        .await;
        assert!(!out.reachable);
        assert!(out.detail.unwrap().contains("not allowed"));
    }

    #[tokio::test]
    async fn unreachable_sse_endpoint_reports_detail() {
        // Reserved TEST-NET-1 address; connect fails fast with the 1s cap.
        let out = probe_server(
            &spec("sse", Some("http://192.0.2.1:1/sse"), None),
            Duration::from_secs(1),
        )
        .await;
        assert!(!out.reachable);
        assert_eq!(out.status, "error");
        assert!(out.detail.is_some());
    }
}
