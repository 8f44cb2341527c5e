//! Typed operations over a guest agent connection (spec §4.2).

use std::os::fd::OwnedFd;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::UnixStream;
use tokio::time::Instant;

use hypercell_constants::agent::{CONNECT_RETRIES, CONNECT_RETRY_DELAY};

use crate::error::{AgentError, Result};
use crate::transport::AgentTransport;
use crate::types::{CreateProcessRequest, DnsConfig, KillResult, ProcessSpec, RelaySocketRequest, StartProcessResult, StdioPorts, WaitProcessResult};

/// A connection to a single guest agent. Every call is cancellable via the
/// caller's own timeout (wrap the future in `tokio::time::timeout`); only
/// `wait_process` takes an explicit deadline since the spec calls it out as
/// raising a typed `timeout` rather than a generic transport cancellation.
pub struct AgentClient {
    transport: AgentTransport,
}

impl AgentClient {
    /// Connect to a host Unix socket path, retrying up to
    /// `CONNECT_RETRIES` times with `CONNECT_RETRY_DELAY` between attempts.
    pub async fn connect(path: &std::path::Path) -> Result<Self> {
        let mut last_err = None;
        for attempt in 0..CONNECT_RETRIES {
            match UnixStream::connect(path).await {
                Ok(stream) => return Ok(Self { transport: AgentTransport::new(stream) }),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < CONNECT_RETRIES {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(AgentError::Io(last_err.unwrap()))
    }

    /// Adopt an already-connected fd handed back by the hypervisor (a
    /// vsock connection dup'd by the boot path), skipping the dial/backoff
    /// loop entirely.
    pub fn from_connected_fd(fd: OwnedFd) -> Result<Self> {
        let std_stream = std::os::unix::net::UnixStream::from(fd);
        std_stream.set_nonblocking(true)?;
        let stream = UnixStream::from_std(std_stream)?;
        Ok(Self { transport: AgentTransport::new(stream) })
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value> {
        self.transport.call(method, params).await
    }

    pub async fn standard_setup(&self) -> Result<()> {
        self.call("standardSetup", json!({})).await?;
        Ok(())
    }

    pub async fn mount(&self, fs_type: &str, source: &str, destination: &str, options: &[String]) -> Result<()> {
        self.call("mount", json!({ "type": fs_type, "source": source, "destination": destination, "options": options })).await?;
        Ok(())
    }

    pub async fn umount(&self, path: &str, flags: i32) -> Result<()> {
        self.call("umount", json!({ "path": path, "flags": flags })).await?;
        Ok(())
    }

    pub async fn mkdir(&self, path: &str, recursive: bool, perms: u32) -> Result<()> {
        self.call("mkdir", json!({ "path": path, "recursive": recursive, "perms": perms })).await?;
        Ok(())
    }

    pub async fn create_process(
        &self,
        id: &str,
        container_id: Option<&str>,
        stdio: StdioPorts,
        spec: ProcessSpec,
    ) -> Result<()> {
        let request = CreateProcessRequest { id: id.to_string(), container_id: container_id.map(str::to_string), stdio, spec };
        self.call("createProcess", serde_json::to_value(request)?).await?;
        Ok(())
    }

    pub async fn start_process(&self, id: &str, container_id: Option<&str>) -> Result<i32> {
        let result = self.call("startProcess", json!({ "id": id, "containerID": container_id })).await?;
        let parsed: StartProcessResult = serde_json::from_value(result)?;
        Ok(parsed.guest_pid)
    }

    pub async fn signal_process(&self, id: &str, container_id: Option<&str>, signal: i32) -> Result<()> {
        self.call("signalProcess", json!({ "id": id, "containerID": container_id, "signal": signal })).await?;
        Ok(())
    }

    pub async fn resize_process(&self, id: &str, container_id: Option<&str>, cols: u16, rows: u16) -> Result<()> {
        self.call("resizeProcess", json!({ "id": id, "containerID": container_id, "cols": cols, "rows": rows })).await?;
        Ok(())
    }

    /// `waitProcess` on a transport timeout raises a typed `Timeout` error
    /// with no side effects on the agent's process table — the guest
    /// keeps waiting; only this call drops.
    pub async fn wait_process(&self, id: &str, container_id: Option<&str>, timeout: Option<Duration>) -> Result<i32> {
        let call = self.call("waitProcess", json!({ "id": id, "containerID": container_id }));
        let result = match timeout {
            Some(duration) => {
                let deadline = Instant::now() + duration;
                match tokio::time::timeout(duration, call).await {
                    Ok(inner) => inner?,
                    Err(_) => return Err(AgentError::Timeout { deadline: deadline.into_std() }),
                }
            }
            None => call.await?,
        };
        let parsed: WaitProcessResult = serde_json::from_value(result)?;
        Ok(parsed.exit_code)
    }

    pub async fn delete_process(&self, id: &str, container_id: Option<&str>) -> Result<()> {
        self.call("deleteProcess", json!({ "id": id, "containerID": container_id })).await?;
        Ok(())
    }

    pub async fn up(&self, iface: &str) -> Result<()> {
        self.call("up", json!({ "iface": iface })).await?;
        Ok(())
    }

    pub async fn down(&self, iface: &str) -> Result<()> {
        self.call("down", json!({ "iface": iface })).await?;
        Ok(())
    }

    pub async fn address_add(&self, iface: &str, cidr: &str) -> Result<()> {
        self.call("addressAdd", json!({ "iface": iface, "cidr": cidr })).await?;
        Ok(())
    }

    pub async fn route_add_default(&self, iface: &str, gateway: &str) -> Result<()> {
        self.call("routeAddDefault", json!({ "iface": iface, "gw": gateway })).await?;
        Ok(())
    }

    pub async fn configure_dns(&self, config: DnsConfig, location: &str) -> Result<()> {
        self.call("configureDNS", json!({ "config": config, "location": location })).await?;
        Ok(())
    }

    pub async fn getenv(&self, name: &str) -> Result<Option<String>> {
        let result = self.call("getenv", json!({ "name": name })).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn setenv(&self, name: &str, value: &str) -> Result<()> {
        self.call("setenv", json!({ "name": name, "value": value })).await?;
        Ok(())
    }

    pub async fn sysctl(&self, settings: &std::collections::HashMap<String, String>) -> Result<()> {
        self.call("sysctl", json!({ "settings": settings })).await?;
        Ok(())
    }

    pub async fn set_time(&self, sec: i64, usec: i64) -> Result<()> {
        self.call("setTime", json!({ "sec": sec, "usec": usec })).await?;
        Ok(())
    }

    pub async fn sync(&self) -> Result<()> {
        self.call("sync", json!({})).await?;
        Ok(())
    }

    pub async fn kill(&self, pid: i32, signal: i32) -> Result<bool> {
        let result = self.call("kill", json!({ "pid": pid, "signal": signal })).await?;
        let parsed: KillResult = serde_json::from_value(result)?;
        Ok(parsed.success)
    }

    /// Tells the guest to terminate every process and flush disk state
    /// before the hypervisor is torn down: `SIGTERM(-1)`, 10ms, `sync`,
    /// `SIGKILL(-1)`, 10ms, `sync` again, all performed agent-side.
    pub async fn syncing_shutdown(&self) -> Result<()> {
        self.call("syncingShutdown", json!({})).await?;
        Ok(())
    }

    pub async fn setup_emulator(&self, binary_path: &str, binfmt_entry: &str) -> Result<()> {
        self.call("setupEmulator", json!({ "binaryPath": binary_path, "binfmtEntry": binfmt_entry })).await?;
        Ok(())
    }

    pub async fn relay_socket(&self, request: RelaySocketRequest) -> Result<()> {
        self.call("relaySocket", serde_json::to_value(request)?).await?;
        Ok(())
    }

    pub async fn stop_socket_relay(&self, id: &str) -> Result<()> {
        self.call("stopSocketRelay", json!({ "id": id })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// A single-shot fake agent: reads one frame, always answers `ok`
    /// with an empty result.
    async fn spawn_echo_ok_agent(path: std::path::PathBuf) {
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await.unwrap();
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await.unwrap();
            let req: serde_json::Value = serde_json::from_slice(&body).unwrap();
            let seq = req["seq"].as_u64().unwrap();
            let response = json!({ "seq": seq, "ok": true, "status": 0, "message": "", "result": {} });
            let out = serde_json::to_vec(&response).unwrap();
            stream.write_all(&(out.len() as u32).to_le_bytes()).await.unwrap();
            stream.write_all(&out).await.unwrap();
        });
    }

    fn socket_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("hypercell-agent-test-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn standard_setup_round_trips_ok_response() {
        let path = socket_path("standard-setup");
        let _ = std::fs::remove_file(&path);
        spawn_echo_ok_agent(path.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let client = AgentClient::connect(&path).await.unwrap();
        client.standard_setup().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn wait_process_times_out_without_agent_response() {
        let path = socket_path("wait-timeout");
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // Accept but never respond — the client's deadline must fire.
            std::future::pending::<()>().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let client = AgentClient::connect(&path).await.unwrap();
        let result = client.wait_process("init", None, Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(AgentError::Timeout { .. })));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let path = socket_path("missing");
        let _ = std::fs::remove_file(&path);
        let result = AgentClient::connect(&path).await;
        assert!(result.is_err());
    }
}
