//! One-shot completion of a public HTTP call

use axum::response::{IntoResponse, Response};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::sync::oneshot;
use tunnel_relay_common::HttpResponse;
use tunnel_relay_common::constants::TUNNEL_ERROR_HEADER;
use tunnel_relay_common::map_to_headers;

use crate::error::RelayError;

/// The status, headers and body handed back to the public caller
#[derive(Debug)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RelayResponse {
    /// Convert a `response` frame into an HTTP response
    pub fn from_tunnel(response: HttpResponse) -> Result<Self, RelayError> {
        let status = StatusCode::from_u16(response.status_code).map_err(|_| {
            RelayError::InvalidResponse(format!("status code {}", response.status_code))
        })?;
        let body = response
            .decoded_body()
            .map_err(|e| RelayError::InvalidResponse(format!("body encoding: {}", e)))?;

        Ok(Self {
            status,
            headers: map_to_headers(&response.headers),
            body,
        })
    }

    /// A relay-generated response describing a failure
    pub fn from_error(err: &RelayError) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(TUNNEL_ERROR_HEADER, HeaderValue::from_static(err.label()));

        Self {
            status: err.status_code(),
            headers,
            body: err.client_message().into_bytes(),
        }
    }
}

impl From<RelayError> for RelayResponse {
    fn from(err: RelayError) -> Self {
        Self::from_error(&err)
    }
}

impl IntoResponse for RelayResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Completes the caller waiting on the paired receiver; usable exactly once
#[derive(Debug)]
pub struct ResponseSink {
    tx: oneshot::Sender<RelayResponse>,
}

impl ResponseSink {
    pub fn channel() -> (Self, oneshot::Receiver<RelayResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver the response; returns false if the caller has already gone away
    pub fn complete(self, response: RelayResponse) -> bool {
        self.tx.send(response).is_ok()
    }

    /// Deliver a relay-generated failure
    pub fn fail(self, err: &RelayError) -> bool {
        self.complete(RelayResponse::from_error(err))
    }
}
