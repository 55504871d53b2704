use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Serves `/health` (liveness) and `/ready` (readiness) on the admin listener.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<fn() -> E>,
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

impl<F, E, B> Service<Request<B>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let is_ready = (self.is_ready)();
        let is_get = req.method() == Method::GET;
        let path = req.uri().path().to_owned();

        Box::pin(async move {
            let ok_body = || Full::new(Bytes::from("ok\n")).map_err(|e| match e {}).boxed();

            let res = match (is_get, path.as_str()) {
                (true, "/health") => Response::new(ok_body()),
                (true, "/ready") => match is_ready {
                    true => Response::new(ok_body()),
                    false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
                },
                (false, "/health" | "/ready") => {
                    make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED)
                }
                _ => make_boxed_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn request(method: Method, path: &str) -> Request<()> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let ready = AdminService::<_, Infallible>::new(|| true);
        let res = ready.call(request(Method::GET, "/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = ready.call(request(Method::GET, "/ready")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let not_ready = AdminService::<_, Infallible>::new(|| false);
        let res = not_ready.call(request(Method::GET, "/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = not_ready.call(request(Method::GET, "/ready")).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let admin = AdminService::<_, Infallible>::new(|| true);
        let res = admin.call(request(Method::GET, "/metrics")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = admin.call(request(Method::POST, "/ready")).await.unwrap();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
