use crate::{models::WireEntry, Config, Error, HttpClient};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, Uri};
use std::{fmt::Debug, sync::Arc};

const STATUS_REQUEST_TIMEOUT: u16 = 408;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const STATUS_APPLICATION_INACTIVE: u16 = 439; // Quota

/// Delivers batches to the telemetry server.
///
/// The pipeline only cares about the outcome: `Ok` removes the batch from the queue, `Err`
/// counts as a failure for the circuit breaker and leaves the batch queued.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Send one batch.
    async fn send(&self, batch: &[WireEntry]) -> Result<(), Error>;
}

/// Posts batches as a JSON array to an HTTP endpoint.
#[derive(Debug)]
pub struct HttpTransport<C> {
    client: Arc<C>,
    endpoint: Uri,
}

impl<C> Clone for HttpTransport<C> {
    fn clone(&self) -> Self {
        HttpTransport {
            client: Arc::clone(&self.client),
            endpoint: self.endpoint.clone(),
        }
    }
}

impl<C: HttpClient> HttpTransport<C> {
    /// Create a transport posting to `endpoint`.
    pub fn new(client: C, endpoint: Uri) -> Self {
        HttpTransport {
            client: Arc::new(client),
            endpoint,
        }
    }

    /// Create a transport posting to the endpoint configured in `config`.
    pub fn from_config(client: C, config: &Config) -> Result<Self, Error> {
        Ok(Self::new(client, config.endpoint_uri()?))
    }
}

#[async_trait]
impl<C: HttpClient> Transport for HttpTransport<C> {
    async fn send(&self, batch: &[WireEntry]) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let serialized = serde_json::to_vec(batch).map_err(Error::SerializeRequest)?;
        let request = Request::post(&self.endpoint)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(serialized)
            .map_err(|err| Error::UploadConnection(err.into()))?;

        let response = self
            .client
            .send(request)
            .await
            .map_err(Error::UploadConnection)?;
        handle_response(response)
    }
}

fn handle_response(response: Response<Bytes>) -> Result<(), Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if can_retry(status.as_u16()) {
        Err(Error::Upload(format!("{}: Retry possible", status.as_u16())))
    } else {
        Err(Error::Upload(format!(
            "{}: No retry possible {}",
            status.as_u16(),
            String::from_utf8_lossy(response.body())
        )))
    }
}

/// Whether the server signalled a transient problem. Both kinds count as a failure for the
/// circuit breaker; the distinction only shows in the error message.
fn can_retry(status: u16) -> bool {
    status == STATUS_REQUEST_TIMEOUT
        || status == STATUS_TOO_MANY_REQUESTS
        || status == STATUS_APPLICATION_INACTIVE
        || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn response(status: u16, body: &'static str) -> Response<Bytes> {
        Response::builder()
            .status(status)
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    #[test_case(200 ; "ok")]
    #[test_case(202 ; "accepted")]
    #[test_case(204 ; "no content")]
    fn success(status: u16) {
        handle_response(response(status, "")).unwrap();
    }

    #[test_case(408, "408: Retry possible" ; "timeout")]
    #[test_case(429, "429: Retry possible" ; "throttled")]
    #[test_case(503, "503: Retry possible" ; "unavailable")]
    #[test_case(400, "400: No retry possible bad payload" ; "bad request")]
    fn failure(status: u16, expected: &'static str) {
        match handle_response(response(status, "bad payload")) {
            Err(Error::Upload(message)) => assert_eq!(expected, message),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
