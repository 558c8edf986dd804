//! Thin HTTP boundary over the services.
//!
//! Domain invariant violations become 4xx responses carrying the violated
//! rule; conflicts map to 409 and are retryable by the client; transient or
//! unknown failures map to 5xx without internal detail.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use validator::Validate;

use crate::domain::inventory::ChangeType;
use crate::domain::order::{LineItem, OrderStatus};
use crate::error::Error;
use crate::services::inventory::{InventoryService, NewChange};
use crate::services::orders::OrderService;
use crate::services::payments::{CreatePayment, PaymentOutcome, PaymentService};

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub inventory: Arc<InventoryService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy", "service": "orderflow"})) }),
        )
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/status", put(update_order_status))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/payments", post(create_payment))
        .route("/api/v1/payments/:id", get(get_payment))
        .route("/api/v1/payments/:id/process", post(process_payment))
        .route("/api/v1/payments/:id/refunds", post(create_refund))
        .route("/api/v1/refunds/:id/process", post(process_refund))
        .route("/api/v1/inventory/:product_id/stock", get(get_stock))
        .route("/api/v1/inventory/changes", post(record_change))
        .route("/api/v1/inventory/alerts", get(list_alerts))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let e = self.0;
        let status = match &e {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::InvalidTransition { .. }
            | Error::InvalidOperation(_)
            | Error::InvalidState(_)
            | Error::InsufficientRefundableAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::ConcurrencyConflict => StatusCode::CONFLICT,
            Error::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage(_) | Error::Serialization(_) | Error::Misrouted(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = if status.is_server_error() {
            tracing::error!(error = %e, "internal failure on http boundary");
            "internal error".to_string()
        } else {
            e.to_string()
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn validated<T: Validate>(body: T) -> Result<T, ApiError> {
    body.validate()
        .map_err(|e| ApiError(Error::Validation(e.to_string())))?;
    Ok(body)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub items: Vec<LineItemRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

async fn create_order(
    State(s): State<AppState>,
    Json(r): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<crate::domain::order::Order>)> {
    let r = validated(r)?;
    let items = r
        .items
        .into_iter()
        .map(|i| LineItem {
            product_id: i.product_id,
            variant_id: i.variant_id,
            product_name: i.product_name,
            quantity: i.quantity,
            unit_price: i.unit_price,
        })
        .collect();
    let order = s.orders.create_order(&r.user_id, items).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize)]
pub struct OrderLookup {
    pub by_number: Option<bool>,
}

async fn get_order(
    State(s): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<OrderLookup>,
) -> ApiResult<Json<crate::domain::order::Order>> {
    let order = if q.by_number.unwrap_or(false) {
        s.orders.get_by_number(&id).await?
    } else {
        s.orders.get(&id).await?
    };
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub reason: Option<String>,
}

async fn update_order_status(
    State(s): State<AppState>,
    Path(id): Path<String>,
    Json(r): Json<UpdateStatusRequest>,
) -> ApiResult<Json<crate::domain::order::Order>> {
    let order = s
        .orders
        .update_status(&id, r.status, r.reason, "api")
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

async fn cancel_order(
    State(s): State<AppState>,
    Path(id): Path<String>,
    Json(r): Json<CancelRequest>,
) -> ApiResult<Json<crate::domain::order::Order>> {
    Ok(Json(s.orders.cancel(&id, r.reason, "api").await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1))]
    pub order_id: String,
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub payment_method_id: String,
    pub amount: Decimal,
    #[validate(length(min = 3, max = 3))]
    pub currency: String,
}

async fn create_payment(
    State(s): State<AppState>,
    Json(r): Json<CreatePaymentRequest>,
) -> ApiResult<(StatusCode, Json<crate::domain::payment::PaymentTransaction>)> {
    let r = validated(r)?;
    let transaction = s
        .payments
        .create_payment(CreatePayment {
            order_id: r.order_id,
            user_id: r.user_id,
            payment_method_id: r.payment_method_id,
            amount: r.amount,
            currency: r.currency,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn get_payment(
    State(s): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<crate::domain::payment::PaymentTransaction>> {
    Ok(Json(s.payments.get_transaction(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ProcessPaymentRequest {
    /// Simulated provider outcome; defaults to success.
    pub succeed: Option<bool>,
    pub error: Option<String>,
}

async fn process_payment(
    State(s): State<AppState>,
    Path(id): Path<String>,
    Json(r): Json<ProcessPaymentRequest>,
) -> ApiResult<Json<crate::domain::payment::PaymentTransaction>> {
    let outcome = if r.succeed.unwrap_or(true) {
        PaymentOutcome::Success {
            external_reference: format!("PAY-{:08}", rand::random::<u32>() % 100_000_000),
        }
    } else {
        PaymentOutcome::Failure {
            error: r.error.unwrap_or_else(|| "payment declined".into()),
        }
    };
    Ok(Json(s.payments.process_payment(&id, outcome).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRefundRequest {
    pub amount: Decimal,
    #[validate(length(min = 1))]
    pub reason: String,
}

async fn create_refund(
    State(s): State<AppState>,
    Path(id): Path<String>,
    Json(r): Json<CreateRefundRequest>,
) -> ApiResult<(StatusCode, Json<crate::domain::payment::Refund>)> {
    let r = validated(r)?;
    let refund = s.payments.create_refund(&id, r.amount, &r.reason).await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

#[derive(Debug, Deserialize)]
pub struct ProcessRefundRequest {
    pub succeed: Option<bool>,
}

async fn process_refund(
    State(s): State<AppState>,
    Path(id): Path<String>,
    Json(r): Json<ProcessRefundRequest>,
) -> ApiResult<Json<crate::domain::payment::Refund>> {
    Ok(Json(
        s.payments
            .process_refund(&id, r.succeed.unwrap_or(true))
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    pub variant_id: Option<String>,
}

async fn get_stock(
    State(s): State<AppState>,
    Path(product_id): Path<String>,
    Query(q): Query<StockQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let stock = s
        .inventory
        .current_stock(&product_id, q.variant_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({
        "productId": product_id,
        "variantId": q.variant_id,
        "stock": stock,
    })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordChangeRequest {
    #[validate(length(min = 1))]
    pub product_id: String,
    pub variant_id: Option<String>,
    pub change_type: ChangeType,
    pub quantity_delta: i64,
    #[validate(length(min = 1))]
    pub reason: String,
    #[validate(length(min = 1))]
    pub reference_id: String,
    #[validate(length(min = 1))]
    pub user_id: String,
}

async fn record_change(
    State(s): State<AppState>,
    Json(r): Json<RecordChangeRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let r = validated(r)?;
    let applied = s
        .inventory
        .record_change(NewChange {
            product_id: r.product_id,
            variant_id: r.variant_id,
            change_type: r.change_type,
            quantity_delta: r.quantity_delta,
            reason: r.reason,
            reference_id: r.reference_id,
            user_id: r.user_id,
        })
        .await?;
    let status = if applied {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(serde_json::json!({"applied": applied}))))
}

async fn list_alerts(
    State(s): State<AppState>,
) -> ApiResult<Json<Vec<crate::domain::inventory::InventoryAlert>>> {
    Ok(Json(s.inventory.alerts().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_item() -> LineItemRequest {
        LineItemRequest {
            product_id: "P1".into(),
            variant_id: None,
            product_name: "Widget".into(),
            quantity: 1,
            unit_price: "10.00".parse().unwrap(),
        }
    }

    #[test]
    fn order_request_validation_rejects_empty_items() {
        let empty = CreateOrderRequest {
            user_id: "U1".into(),
            items: vec![],
        };
        assert!(validated(empty).is_err());

        let ok = CreateOrderRequest {
            user_id: "U1".into(),
            items: vec![line_item()],
        };
        assert!(validated(ok).is_ok());
    }

    #[test]
    fn payment_request_validation_checks_currency_code() {
        let bad_currency = CreatePaymentRequest {
            order_id: "O1".into(),
            user_id: "U1".into(),
            payment_method_id: "PM1".into(),
            amount: "10.00".parse().unwrap(),
            currency: "USDX".into(),
        };
        assert!(validated(bad_currency).is_err());
    }
}
