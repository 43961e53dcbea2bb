//! Request logging middleware
//!
//! Logs method, path, status and latency of every request.

use axum::{extract::Request, response::Response};
use std::time::Instant;
use tower::Layer;

#[derive(Clone, Default)]
pub struct RequestLogLayer;

impl RequestLogLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct RequestLogMiddleware<S> {
    inner: S,
}

impl<S> tower::Service<Request> for RequestLogMiddleware<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let mut inner = self.inner.clone();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let started = Instant::now();
            let response = inner.call(req).await?;
            let status = response.status();
            let elapsed = started.elapsed().as_millis();

            if status.is_server_error() {
                log::warn!("{} {} -> {} ({} ms)", method, path, status, elapsed);
            } else {
                log::debug!("{} {} -> {} ({} ms)", method, path, status, elapsed);
            }
            Ok(response)
        })
    }
}
