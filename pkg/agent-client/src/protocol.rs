//! Wire envelopes for the length-prefixed JSON frame transport (spec §4.2).
//!
//! Every frame is a `u32` little-endian byte count followed by a JSON body.
//! Requests and responses are correlated by `seq`, assigned by the client
//! for each in-flight call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct RequestEnvelope {
    pub seq: u64,
    pub method: &'static str,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct ResponseEnvelope {
    pub seq: u64,
    pub ok: bool,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Value,
}
