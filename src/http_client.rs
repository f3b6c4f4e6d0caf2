use crate::error::TransportError;
use anyhow::{Context, Result, ensure};
use log::debug;
use reqwest::{Client, Response};
use std::time::Duration;

/// Create the HTTP client used to talk to the device
///
/// # Arguments
/// * `request_timeout` - Upper bound for a whole request, applied unless a
///   request overrides it
///
/// # Examples
/// ```no_run
/// use espac_config::http_client::device_client;
/// use std::time::Duration;
///
/// let client = device_client(Duration::from_secs(5))
///     .expect("failed to create client");
/// ```
pub fn device_client(request_timeout: Duration) -> Result<Client> {
    ensure!(
        !request_timeout.is_zero(),
        "failed since request timeout is zero"
    );

    Client::builder()
        .timeout(request_timeout)
        .connect_timeout(request_timeout)
        .build()
        .context("failed to create device HTTP client")
}

/// Handle HTTP response by checking status and extracting body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "GET /config.dat")
///
/// # Returns
/// * `Ok(String)` - The response body if the status is successful
/// * `Err(TransportError::Status)` - If the device answered with a non-success status
/// * `Err(TransportError::Body)` - If reading the body fails
pub async fn handle_http_response(
    res: Response,
    context_msg: &str,
) -> Result<String, TransportError> {
    let status = res.status();
    let body = res.text().await.map_err(|e| {
        if e.is_timeout() || e.is_connect() {
            TransportError::Connection(format!("{context_msg}: {e}"))
        } else {
            TransportError::Body(format!("{context_msg}: {e}"))
        }
    })?;

    if !status.is_success() {
        debug!("{context_msg} failed with status {status} and body: {body}");
        return Err(TransportError::Status {
            status: status.as_u16(),
        });
    }

    Ok(body)
}
