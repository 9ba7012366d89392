//! Legal order-status and payment-status transitions.
//!
//! Payment reconciliation and admin actions are separate triggers: the
//! reconciler may only confirm or fail an order, while fulfilment and
//! cancellation belong to admins.

use crate::{
    entity::status::{OrderStatus, PaymentStatus},
    error::{AppError, AppResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    PaymentPaid,
    PaymentFailed,
    Admin,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Delivered)
    }

    pub fn can_transition_to(self, to: OrderStatus, trigger: Trigger) -> bool {
        use OrderStatus::*;
        match (self, to, trigger) {
            (Pending | PaymentFailed, Confirmed, Trigger::PaymentPaid) => true,
            (Pending, PaymentFailed, Trigger::PaymentFailed) => true,
            (Confirmed, Shipped, Trigger::Admin) => true,
            (Shipped, Delivered, Trigger::Admin) => true,
            (Pending | Confirmed | Shipped | PaymentFailed, Cancelled, Trigger::Admin) => true,
            _ => false,
        }
    }
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Refunded)
    }

    pub fn can_transition_to(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Pending, Paid) | (Pending, Failed) | (Failed, Paid) | (Paid, Refunded)
        )
    }
}

/// Validates an order transition, naming the violated guard on rejection.
pub fn transition(from: OrderStatus, to: OrderStatus, trigger: Trigger) -> AppResult<OrderStatus> {
    if from.can_transition_to(to, trigger) {
        return Ok(to);
    }

    let reason = if from.is_terminal() {
        format!("order is {from}, which is terminal")
    } else if from == to {
        format!("order is already {from}")
    } else {
        match (to, trigger) {
            (OrderStatus::Confirmed | OrderStatus::PaymentFailed, Trigger::Admin) => {
                format!("{to} can only be reached through payment reconciliation")
            }
            (OrderStatus::Shipped | OrderStatus::Delivered | OrderStatus::Cancelled, _)
                if trigger != Trigger::Admin =>
            {
                format!("{to} requires an admin action")
            }
            (OrderStatus::PaymentFailed, Trigger::PaymentFailed) => {
                format!("payment failure only applies to PENDING orders, order is {from}")
            }
            _ => format!("{from} cannot move to {to}"),
        }
    };

    Err(AppError::Conflict(format!(
        "illegal order transition {from} -> {to}: {reason}"
    )))
}

pub fn payment_transition(from: PaymentStatus, to: PaymentStatus) -> AppResult<PaymentStatus> {
    if from.can_transition_to(to) {
        return Ok(to);
    }
    let reason = if from.is_terminal() {
        format!("payment is {from}, which is terminal")
    } else if from == to {
        format!("payment is already {from}")
    } else {
        format!("{from} cannot move to {to}")
    };
    Err(AppError::Conflict(format!(
        "illegal payment transition {from} -> {to}: {reason}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;
    use sea_orm::Iterable;

    #[test]
    fn payment_triggers_confirm_or_fail_pending_orders() {
        assert_eq!(transition(Pending, Confirmed, Trigger::PaymentPaid).unwrap(), Confirmed);
        assert_eq!(
            transition(Pending, PaymentFailed, Trigger::PaymentFailed).unwrap(),
            PaymentFailed
        );
        assert_eq!(
            transition(PaymentFailed, Confirmed, Trigger::PaymentPaid).unwrap(),
            Confirmed
        );
        assert!(transition(Confirmed, PaymentFailed, Trigger::PaymentFailed).is_err());
    }

    #[test]
    fn admin_drives_fulfilment() {
        assert!(transition(Confirmed, Shipped, Trigger::Admin).is_ok());
        assert!(transition(Shipped, Delivered, Trigger::Admin).is_ok());
        assert!(transition(Pending, Shipped, Trigger::Admin).is_err());
        assert!(transition(Pending, Confirmed, Trigger::Admin).is_err());
        for from in [Pending, Confirmed, Shipped, PaymentFailed] {
            assert!(transition(from, Cancelled, Trigger::Admin).is_ok(), "{from}");
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in [Cancelled, Delivered] {
            for to in OrderStatus::iter() {
                for trigger in [Trigger::PaymentPaid, Trigger::PaymentFailed, Trigger::Admin] {
                    let err = transition(from, to, trigger).unwrap_err();
                    match err {
                        AppError::Conflict(msg) => assert!(msg.contains("terminal"), "{msg}"),
                        other => panic!("unexpected error {other:?}"),
                    }
                }
            }
        }
    }

    #[test]
    fn refunded_payment_is_terminal() {
        use PaymentStatus::*;
        assert!(payment_transition(Refunded, Paid).is_err());
        assert!(payment_transition(Paid, Refunded).is_ok());
        assert!(payment_transition(Failed, Paid).is_ok());
        assert!(payment_transition(Paid, Failed).is_err());
        assert!(payment_transition(Paid, Pending).is_err());
    }
}
