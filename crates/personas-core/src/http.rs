//! Response checking shared by the HTTP backends.

use crate::error::{Error, Result};
use crate::retry::parse_retry_after;

/// Pass a successful response through; map anything else into the error taxonomy.
///
/// `context` names the call in the resulting message.
pub(crate) async fn check_response(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let error_text = resp.text().await.unwrap_or_default();
    let message = if error_text.is_empty() {
        context.to_string()
    } else {
        format!("{}: {}", context, error_text.trim())
    };
    Err(Error::from_status(status.as_u16(), message, retry_after))
}
