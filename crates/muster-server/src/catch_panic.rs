use crate::ApiError;
use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::any::Any;
use tracing::Instrument;

/// Run the rest of the stack on its own task so a panicking handler becomes
/// a JSON 500 instead of a dropped connection.
pub(crate) async fn catch_panic_middleware(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(next.run(request).in_current_span()).await {
        Ok(response) => response,
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            let message = format!("internal error: {}", panic_message(payload.as_ref()));
            ApiError::Internal(message).into_response()
        }
        Err(_) => ApiError::Internal("request was cancelled".to_string()).into_response(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "handler panicked"
    }
}
