use crate::http::{full_body, make_error_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Liveness and readiness probes, served on a listener separate from the
/// webhook traffic.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = probe_response((self.is_ready)(), req.method(), req.uri().path());
        Box::pin(async move { Ok(res) })
    }
}

fn probe_response<E>(is_ready: bool, method: &Method, path: &str) -> Response<BoxBody<Bytes, E>> {
    if method != Method::GET {
        return make_error_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    match path {
        "/health" => Response::new(full_body("ok\n")),
        "/ready" if is_ready => Response::new(full_body("ok\n")),
        "/ready" => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
        _ => make_error_response(StatusCode::NOT_FOUND),
    }
}
