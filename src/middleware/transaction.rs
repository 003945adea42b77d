use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

use crate::app::AppState;
use crate::database::transaction::BoundTx;
use crate::error::ApiError;

/// Binds one transaction to the request and finalises it from the response.
///
/// Responses below 500 commit, everything else rolls back. A panic further
/// down the chain rolls back and is then re-raised. A request dropped before
/// finalisation rolls back through the guard.
pub async fn bind_transaction(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.extensions().get::<BoundTx>().is_some() {
        tracing::debug!("Reusing transaction already bound to this request");
        return next.run(request).await;
    }

    let tx = match BoundTx::begin(state.tx_provider.as_ref()).await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!("Failed to open transaction: {}", e);
            return ApiError::internal_server_error("Failed to open transaction").into_response();
        }
    };

    request.extensions_mut().insert(tx.clone());
    let mut guard = AbandonGuard(Some(tx.clone()));

    let response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            tracing::error!("Request handler panicked, rolling back transaction");
            if let Err(e) = tx.rollback().await {
                tracing::error!("Rollback after panic failed: {}", e);
            }
            guard.disarm();
            std::panic::resume_unwind(panic);
        }
    };

    let response = match tx.finalize(response.status()).await {
        Ok(_) => response,
        Err(e) => {
            tracing::error!("Failed to finalize transaction: {}", e);
            ApiError::internal_server_error("Failed to complete transaction").into_response()
        }
    };

    guard.disarm();
    response
}

/// Rolls the transaction back if the request future is dropped mid-flight.
struct AbandonGuard(Option<BoundTx>);

impl AbandonGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            tx.abandon();
        }
    }
}
