//! Typed requests for the gateway command surface.
//!
//! A [`Request`] is just a method, a path and an optional JSON body.  The
//! associated constructors below cover the commands the client exposes; any
//! other endpoint can be reached with [`Request::new`].

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};

use super::frame::ParseError;

/// HTTP-style verb placed at the start of a request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    /// Returns the verb exactly as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            other => Err(ParseError::UnknownMethod(other.to_string())),
        }
    }
}

/// A single request to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl Request {
    /// Creates a request for an arbitrary endpoint.
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    /// `GET <path>` without a body.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    /// `PUT <path>` with an optional body.
    pub fn put(path: impl Into<String>, body: Option<Value>) -> Self {
        Self::new(Method::Put, path, body)
    }

    /// `POST <path>` without a body.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path, None)
    }

    /// Serialises the body to its wire text (empty when absent).
    pub fn body_text(&self) -> String {
        self.body.as_ref().map(Value::to_string).unwrap_or_default()
    }

    // ── Gateway commands ──────────────────────────────────────────────────────

    /// `GET /ping` – cheap liveness probe.
    pub fn ping() -> Self {
        Self::get("/ping")
    }

    /// `GET /info` – gateway identity, firmware and configuration flags.
    pub fn info() -> Self {
        Self::get("/info")
    }

    /// `GET /configs/file` – installation description (rooms, endpoints).
    pub fn configs_file() -> Self {
        Self::get("/configs/file")
    }

    /// `GET /configs/gateway/geoloc`
    pub fn gateway_geoloc() -> Self {
        Self::get("/configs/gateway/geoloc")
    }

    /// `PUT /configs/gateway/api_mode` – switches the gateway to API mode.
    pub fn gateway_api_mode() -> Self {
        Self::put("/configs/gateway/api_mode", None)
    }

    /// `PUT /configs/gateway/password` with `{"new": .., "old": ..}`.
    pub fn gateway_password(new_password: &str, old_password: &str) -> Self {
        Self::put(
            "/configs/gateway/password",
            Some(json!({ "new": new_password, "old": old_password })),
        )
    }

    /// `POST /refresh/all` – asks the gateway to poll every device.
    pub fn refresh_all() -> Self {
        Self::post("/refresh/all")
    }

    pub fn areas_data() -> Self {
        Self::get("/areas/data")
    }

    pub fn areas_cmeta() -> Self {
        Self::get("/areas/cmeta")
    }

    pub fn areas_meta() -> Self {
        Self::get("/areas/meta")
    }

    pub fn devices_cmeta() -> Self {
        Self::get("/devices/cmeta")
    }

    pub fn devices_meta() -> Self {
        Self::get("/devices/meta")
    }

    pub fn devices_data() -> Self {
        Self::get("/devices/data")
    }

    /// `GET /devices/{device}/endpoints/{endpoint}/data`
    pub fn device_data(device_id: u64, endpoint_id: u64) -> Self {
        Self::get(endpoint_data_path(device_id, endpoint_id))
    }

    /// `PUT /devices/{device}/endpoints/{endpoint}/data` with
    /// `[{"name": .., "value": ..}]`.
    pub fn put_device_data(device_id: u64, endpoint_id: u64, name: &str, value: Value) -> Self {
        Self::put(
            endpoint_data_path(device_id, endpoint_id),
            Some(json!([{ "name": name, "value": value }])),
        )
    }

    pub fn scenarios_file() -> Self {
        Self::get("/scenarios/file")
    }

    /// `GET /scenarios/{id}` – the gateway runs a scenario when it is fetched.
    pub fn scenario(scenario_id: u64) -> Self {
        Self::get(format!("/scenarios/{scenario_id}"))
    }

    pub fn moments_file() -> Self {
        Self::get("/moments/file")
    }
}

fn endpoint_data_path(device_id: u64, endpoint_id: u64) -> String {
    format!("/devices/{device_id}/endpoints/{endpoint_id}/data")
}
