//! HTTP JSON API for phpool.
//!
//! Every route maps onto one `PoolManager` operation. Request and response
//! bodies are JSON; errors are `{"error": "..."}` with a status derived from
//! the error class. A reload failure after a committed mutation is answered
//! with 202 and a warning, since the change itself is durable.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use phpool_core::{CoreError, ErrorClass, PoolManager, DEFAULT_PHP_VERSION};
use phpool_schema::SettingsOverrides;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

/// A parsed request path. Borrowed segments point into the request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    Pools,
    Pool(&'a str),
    PoolConfig(&'a str),
    Install {
        provider: Option<&'a str>,
        version: &'a str,
    },
    /// Registered runtimes, whichever provider installed them.
    Versions,
    Available {
        provider: Option<&'a str>,
    },
    Providers,
    /// Runtimes a specific provider reports as installed on the host.
    ProviderVersions(&'a str),
}

/// Value of `key` in a `a=1&b=2` query string. Empty values count as absent.
pub fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

pub fn parse_route<'a>(path: &'a str, query: &'a str) -> Option<Route<'a>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let route = match segments.as_slice() {
        ["health"] => Route::Health,
        ["api", "v1", "pools"] => Route::Pools,
        ["api", "v1", "pools", user] => Route::Pool(*user),
        ["api", "v1", "pools", user, "config"] => Route::PoolConfig(*user),
        ["api", "v1", "php", "install", version] => Route::Install {
            provider: query_param(query, "provider"),
            version: *version,
        },
        ["api", "v1", "php", "versions"] => Route::Versions,
        ["api", "v1", "php", "available"] => Route::Available {
            provider: query_param(query, "provider"),
        },
        ["api", "v1", "providers"] => Route::Providers,
        ["api", "v1", "providers", provider, "install", version] => Route::Install {
            provider: Some(*provider),
            version: *version,
        },
        ["api", "v1", "providers", provider, "versions"] => Route::ProviderVersions(*provider),
        ["api", "v1", "providers", provider, "available"] => Route::Available {
            provider: Some(*provider),
        },
        _ => return None,
    };
    Some(route)
}

/// Status and JSON body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::new(status, json!({ "error": message }))
    }

    fn serialized(status: u16, value: &impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self::new(status, body),
            Err(e) => Self::error(500, &format!("serialization failed: {e}")),
        }
    }

    fn from_result<T: Serialize>(status: u16, result: Result<T, CoreError>) -> Self {
        match result {
            Ok(value) => Self::serialized(status, &value),
            Err(e) => Self::from_core(&e),
        }
    }

    fn from_core(e: &CoreError) -> Self {
        let msg = e.to_string();
        match e.class() {
            ErrorClass::Validation => Self::error(400, &msg),
            ErrorClass::NotFound => Self::error(404, &msg),
            ErrorClass::Conflict => Self::error(409, &msg),
            ErrorClass::NotImplemented => Self::error(501, &msg),
            ErrorClass::ReloadFailed => {
                warn!("{msg}");
                Self::new(202, json!({ "committed": true, "warning": msg }))
            }
            ErrorClass::Store | ErrorClass::Internal => {
                error!("{msg}");
                Self::error(500, &msg)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreatePoolRequest {
    username: String,
    #[serde(default)]
    php_version: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    settings: Option<Value>,
}

fn parse_json(body: &[u8]) -> Result<Value, Reply> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| Reply::error(400, &format!("invalid JSON body: {e}")))
}

fn overrides_from(value: Option<&Value>) -> Result<SettingsOverrides, Reply> {
    match value {
        None | Some(Value::Null) => Ok(SettingsOverrides::default()),
        Some(v) => {
            SettingsOverrides::from_json(v).map_err(|e| Reply::from_core(&CoreError::Schema(e)))
        }
    }
}

fn create_pool(manager: &PoolManager, body: &[u8]) -> Reply {
    let value = match parse_json(body) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let request: CreatePoolRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return Reply::error(400, &format!("invalid create request: {e}")),
    };
    let overrides = match overrides_from(request.settings.as_ref()) {
        Ok(o) => o,
        Err(reply) => return reply,
    };
    let version = request.php_version.as_deref().unwrap_or(DEFAULT_PHP_VERSION);
    let result = manager.create_pool_with(
        &request.username,
        version,
        request.provider.as_deref(),
        &overrides,
    );
    if result.is_ok() {
        info!("created pool for {} via HTTP", request.username);
    }
    Reply::from_result(201, result)
}

fn reconfigure_pool(manager: &PoolManager, username: &str, body: &[u8]) -> Reply {
    let value = match parse_json(body) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let overrides = match overrides_from(Some(&value)) {
        Ok(o) => o,
        Err(reply) => return reply,
    };
    Reply::from_result(200, manager.reconfigure_pool(username, &overrides))
}

/// Route one request. Kept free of socket handling so it can be tested directly.
pub fn dispatch(manager: &PoolManager, method: &Method, url: &str, body: &[u8]) -> Reply {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let Some(route) = parse_route(path, query) else {
        return Reply::error(404, "not found");
    };
    match (route, method) {
        (Route::Health, Method::Get) => Reply::new(200, json!({ "status": "ok" })),
        (Route::Pools, Method::Get) => Reply::from_result(200, manager.list_pools()),
        (Route::Pools, Method::Post) => create_pool(manager, body),
        (Route::Pool(user), Method::Get) => Reply::from_result(200, manager.get_pool(user)),
        (Route::Pool(user), Method::Delete) => match manager.delete_pool(user) {
            Ok(record) => Reply::new(
                200,
                json!({ "deleted": record.username, "config_path": record.config_path }),
            ),
            Err(e) => Reply::from_core(&e),
        },
        (Route::PoolConfig(user), Method::Put | Method::Patch) => {
            reconfigure_pool(manager, user, body)
        }
        (Route::Install { provider, version }, Method::Post) => {
            Reply::from_result(200, manager.install_runtime(provider, version))
        }
        (Route::Versions, Method::Get) => Reply::from_result(200, manager.list_runtime_versions()),
        (Route::Available { provider }, Method::Get) => {
            match manager.list_available_runtimes(provider) {
                Ok((kind, catalog)) => Reply::new(
                    200,
                    json!({
                        "provider": kind,
                        "source": catalog.source,
                        "versions": catalog.versions,
                    }),
                ),
                Err(e) => Reply::from_core(&e),
            }
        }
        (Route::Providers, Method::Get) => Reply::serialized(200, &manager.providers()),
        (Route::ProviderVersions(provider), Method::Get) => {
            match manager.list_installed_runtimes(Some(provider)) {
                Ok((kind, versions)) => {
                    Reply::new(200, json!({ "provider": kind, "versions": versions }))
                }
                Err(e) => Reply::from_core(&e),
            }
        }
        _ => Reply::error(405, "method not allowed"),
    }
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

fn respond(req: tiny_http::Request, reply: &Reply) {
    let mut response =
        Response::from_string(reply.body.to_string()).with_status_code(StatusCode(reply.status));
    if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
        response = response.with_header(header);
    }
    let _ = req.respond(response);
}

/// Handle a single HTTP request.
pub fn handle_request(manager: &PoolManager, mut req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let Some(body) = read_body(&mut req) else {
        respond(req, &Reply::error(400, "could not read request body"));
        return;
    };
    let reply = dispatch(manager, &method, &url, &body);
    debug!("{method} {url} -> {}", reply.status);
    respond(req, &reply);
}

/// Start the server loop, blocking the current thread.
pub fn run_server(manager: &PoolManager, addr: &str) -> Result<(), String> {
    let server = Server::http(addr).map_err(|e| format!("failed to bind {addr}: {e}"))?;
    for request in server.incoming_requests() {
        handle_request(manager, request);
    }
    Ok(())
}

/// A test helper that serves a manager on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}`. Dropping the `TestServer` stops it.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    pub fn start(manager: PoolManager) -> Result<Self, String> {
        let server = Arc::new(
            Server::http("127.0.0.1:0").map_err(|e| format!("failed to bind test server: {e}"))?,
        );
        let port = server
            .server_addr()
            .to_ip()
            .ok_or("test server is not listening on an IP address")?
            .port();
        let url = format!("http://127.0.0.1:{port}");

        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&manager, request);
            }
        });

        Ok(Self {
            url,
            port,
            server,
            handle: Some(handle),
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
