//! Typed request/result payloads for each agent operation (spec §4.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub cwd: Option<String>,
    pub terminal: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    #[serde(rename = "additionalGids", skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StdioPorts {
    pub stdin: Option<u32>,
    pub stdout: Option<u32>,
    pub stderr: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateProcessRequest {
    pub id: String,
    #[serde(rename = "containerID", skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub stdio: StdioPorts,
    pub spec: ProcessSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartProcessResult {
    pub guest_pid: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitProcessResult {
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsConfig {
    pub nameservers: Vec<String>,
    pub domain: Option<String>,
    pub search: Vec<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KillResult {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelaySocketRequest {
    pub port: u32,
    pub id: String,
    pub direction: RelayDirection,
    pub from: String,
    pub to: String,
    pub perms: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayDirection {
    Into,
    OutOf,
}
