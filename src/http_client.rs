use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::fmt::Debug;

/// Error returned by an [`HttpClient`].
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Minimal HTTP client used by [`HttpTransport`](crate::HttpTransport).
///
/// Implemented for `reqwest::Client` with the `reqwest-client` or `reqwest-client-rustls`
/// feature. Timeouts are the client's business; a timed out request is just another error.
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Send the request and return the complete response.
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError>;
}

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::{async_trait, Bytes, HttpClient, HttpError, Request, Response};
    use std::convert::TryInto;

    #[async_trait]
    impl HttpClient for ::reqwest::Client {
        async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError> {
            let request: ::reqwest::Request = request.try_into()?;
            let response = self.execute(request).await?;
            Ok(Response::builder()
                .status(response.status())
                .body(response.bytes().await?)?)
        }
    }
}
