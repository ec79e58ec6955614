use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use simcity_core::prelude::ShutdownHandle;
use tiny_http::{Header, Response, Server};

use crate::request::{ApiRequest, ApiResponse};
use crate::routes::ControlApi;

/// Environment variable holding the `host:port` to listen on.
pub const SIMCITY_CONTROL_API_ADDR_ENV: &str = "SIMCITY_CONTROL_API_ADDR";

pub const DEFAULT_ADDR: &str = "127.0.0.1:8787";

/// Request bodies beyond this are rejected.
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

const RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// Serve `api` on `addr` until `shutdown` is triggered. Requests are handled one at a time.
pub fn serve(api: Arc<ControlApi>, addr: &str, shutdown: &ShutdownHandle) -> anyhow::Result<()> {
    let server = Server::http(addr).map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}"))?;
    log::info!("Control API listening on {addr}");

    let mut listener = shutdown.new_listener();
    while !listener.should_shutdown() {
        let mut request = match server.recv_timeout(RECV_TIMEOUT) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("Failed to receive request: {e}");
                continue;
            }
        };

        let response = match read_request(&mut request) {
            Ok(api_request) => {
                let response = api.handle(&api_request);
                log::info!(
                    "{} {} -> {}",
                    api_request.method,
                    api_request.path,
                    response.status
                );
                response
            }
            Err(response) => response,
        };

        if let Err(e) = request.respond(to_http(&response)) {
            log::warn!("Failed to send response: {e}");
        }
    }

    log::info!("Control API stopped");
    Ok(())
}

fn read_request(request: &mut tiny_http::Request) -> Result<ApiRequest, ApiResponse> {
    let mut api_request = ApiRequest::new(request.method().as_str(), request.url());
    api_request.headers = request
        .headers()
        .iter()
        .map(|h| (h.field.as_str().to_string(), h.value.as_str().to_string()))
        .collect();

    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| ApiResponse::error(400, format!("Failed to read request body: {e}")))?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(ApiResponse::error(413, "Request body too large"));
    }
    api_request.body = body;

    Ok(api_request)
}

fn to_http(response: &ApiResponse) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut http =
        Response::from_string(response.body.to_string()).with_status_code(response.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        http = http.with_header(header);
    }
    http
}
