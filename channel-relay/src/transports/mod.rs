pub mod telegram;
pub mod webhook;

pub use telegram::TelegramTransport;
pub use webhook::WebhookTransport;

use crate::types::TransportError;
use reqwest::StatusCode;
use std::future::Future;

/// Sends a message split into `parts`, in order.
///
/// Only a failure of the first part keeps its class. After that the target
/// already holds part of the message, so the error becomes fatal and a retry
/// cannot send the earlier parts twice.
pub async fn send_parts<F, Fut>(parts: &[&str], mut send: F) -> Result<(), TransportError>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    for (index, part) in parts.iter().copied().enumerate() {
        match send(part).await {
            Ok(()) => {}
            Err(e) if index == 0 => return Err(e),
            Err(TransportError::Recoverable(reason) | TransportError::Fatal(reason)) => {
                return Err(TransportError::Fatal(format!(
                    "sent {} of {} parts, then: {}",
                    index,
                    parts.len(),
                    reason
                )));
            }
        }
    }
    Ok(())
}

/// Connection-level failures are worth retrying; anything else is not.
pub(crate) fn classify_request_error(error: reqwest::Error) -> TransportError {
    if error.is_connect() || error.is_timeout() || error.is_request() || error.is_body() {
        TransportError::Recoverable(error.to_string())
    } else {
        TransportError::Fatal(error.to_string())
    }
}

/// Throttling and server errors are transient, other non-success statuses mean a bad request.
pub(crate) fn classify_status(status: StatusCode, detail: &str) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(TransportError::Recoverable(format!("HTTP {}: {}", status, detail)))
    } else {
        Err(TransportError::Fatal(format!("HTTP {}: {}", status, detail)))
    }
}
