//! Upstream JSON calls shared by the providers, the token endpoint, the
//! data client and the geocoder.

use futures_util::StreamExt;
use serde::de::DeserializeOwned;

use crate::{AstroError, Result};

/// Error bodies end up in logs and envelopes; keep only the head.
const MAX_ERROR_BODY_BYTES: usize = 8 * 1024;
/// Completions and chart payloads stay well below this.
const MAX_RESPONSE_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Sends `req` and decodes a 2xx JSON body. Any other status becomes
/// [`AstroError::Api`] with the (capped) upstream body.
pub(crate) async fn send_json<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T> {
    let response = req.send().await?;
    let status = response.status();

    if !status.is_success() {
        let (head, cut) = read_capped(response, MAX_ERROR_BODY_BYTES).await;
        let mut body = String::from_utf8_lossy(&head).trim_end().to_string();
        if cut {
            body.push_str(" ...(truncated)");
        }
        return Err(AstroError::Api { status, body });
    }

    let (bytes, cut) = read_capped(response, MAX_RESPONSE_BODY_BYTES).await;
    if cut {
        return Err(AstroError::InvalidResponse(format!(
            "response body exceeds {MAX_RESPONSE_BODY_BYTES} bytes"
        )));
    }
    Ok(serde_json::from_slice::<T>(&bytes)?)
}

/// Reads at most `limit` bytes; the flag is set when more were on offer.
/// A broken stream ends the read with what arrived so far.
async fn read_capped(response: reqwest::Response, limit: usize) -> (Vec<u8>, bool) {
    let mut out = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(Ok(chunk)) = stream.next().await {
        let room = limit.saturating_sub(out.len());
        if chunk.len() > room {
            out.extend_from_slice(&chunk[..room]);
            return (out, true);
        }
        out.extend_from_slice(&chunk);
    }
    (out, false)
}
