//! Notifications: durable persistence paired with live push

pub mod model;
pub mod service;

pub use model::{kinds, Notification, NotificationStatus};
pub use service::NotificationService;
