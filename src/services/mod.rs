pub mod admin_service;
pub mod cart_snapshot;
pub mod locks;
pub mod notification;
pub mod order_service;
pub mod payment_service;
pub mod state_machine;
