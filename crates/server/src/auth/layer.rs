//! Tower layer inserting the caller's [`Authentication`] into every
//! request, rejecting invalid bearer tokens when OIDC is configured.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::OidcConfig;
use context::Authentication;
use http::{Request, Response, StatusCode};
use serde::Serialize;
use tower::Layer;

use super::{error::AuthError, jwt::JwtAuth};

#[derive(Clone)]
pub(crate) struct AuthLayer(Arc<Option<JwtAuth>>);

impl AuthLayer {
    pub fn new(config: Option<OidcConfig>) -> Self {
        Self(Arc::new(config.map(JwtAuth::new)))
    }
}

impl<Service> Layer<Service> for AuthLayer
where
    Service: Send + Clone,
{
    type Service = AuthService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AuthService {
            next,
            auth: self.0.clone(),
        }
    }
}

pub(crate) struct AuthService<Service> {
    next: Service,
    auth: Arc<Option<JwtAuth>>,
}

impl<S: Clone> Clone for AuthService<S> {
    fn clone(&self) -> Self {
        AuthService {
            next: self.next.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AuthService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let auth = self.auth.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let Some(jwt_auth) = auth.as_ref() else {
                // No provider configured: every caller passes anonymously.
                parts.extensions.insert(Authentication::default());
                return next.call(Request::from_parts(parts, body)).await;
            };

            let Some(header) = parts.headers.get(http::header::AUTHORIZATION) else {
                return Ok(error_response(AuthError::InvalidToken("missing token")));
            };

            match jwt_auth.authenticate(header).await {
                Ok(caller) => {
                    parts.extensions.insert(Authentication { caller: Some(caller) });
                    next.call(Request::from_parts(parts, body)).await
                }
                Err(err) => Ok(error_response(err)),
            }
        })
    }
}

fn error_response(err: AuthError) -> Response<Body> {
    #[derive(Serialize)]
    struct ErrorResponse {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_description: Option<String>,
    }

    let (status_code, error_response) = match err {
        AuthError::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            ErrorResponse {
                error: "unauthorized".to_string(),
                error_description: None,
            },
        ),
        AuthError::InvalidToken(message) => (
            StatusCode::UNAUTHORIZED,
            ErrorResponse {
                error: "invalid_token".to_string(),
                error_description: Some(message.to_string()),
            },
        ),
        AuthError::Internal => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse {
                error: "internal_server_error".to_string(),
                error_description: Some("An internal error occurred".to_string()),
            },
        ),
    };

    let body = serde_json::to_string(&error_response).unwrap_or_else(|_| r#"{"error":"internal_error"}"#.to_string());

    Response::builder()
        .status(status_code)
        .header("WWW-Authenticate", "Bearer")
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}
