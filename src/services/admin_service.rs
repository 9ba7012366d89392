use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{ActiveModelTrait, EntityTrait, QuerySelect, Set, TransactionTrait};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::{admin::UpdateOrderStatusRequest, payments::ReconciliationResult},
    entity::orders::{ActiveModel as OrderActive, Entity as Orders},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Order,
    response::{ApiResponse, Meta},
    services::state_machine::{self, Trigger},
    state::AppState,
};

/// Fulfilment and cancellation. Payment-driven statuses are rejected by the
/// state machine.
#[tracing::instrument(skip(state, user, payload), fields(actor = %user.subject, to = %payload.status))]
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let _guard = state.order_locks.lock(id).await;
    let txn = state.orm.begin().await?;
    let existing = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let from = existing.status;
    let to = state_machine::transition(from, payload.status, Trigger::Admin)?;

    let mut active: OrderActive = existing.into();
    active.status = Set(to);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    if let Err(err) = log_audit(
        &txn,
        Some(user.subject.as_str()),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "from": from, "to": to })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
    txn.commit().await?;

    tracing::info!(order_number = %order.order_number, %from, %to, "order status updated");
    Ok(ApiResponse::success(
        "Order updated",
        order.into(),
        Some(Meta::empty()),
    ))
}

pub async fn refund_payment(
    state: &AppState,
    user: &AuthUser,
    transaction_id: &str,
) -> AppResult<ApiResponse<ReconciliationResult>> {
    ensure_admin(user)?;
    let reconciliation = state
        .reconciler
        .refund_payment(transaction_id, &user.subject)
        .await?;
    Ok(ApiResponse::success(
        "Payment refunded",
        reconciliation.into(),
        Some(Meta::empty()),
    ))
}
