//! Browser Notifications
//!
//! [`NotificationHub`] implements the [`Notifier`](crate::application::ports::Notifier)
//! port; [`router`] serves it over WebSocket.

mod hub;
mod ws;

pub use hub::{
    CLIENT_QUEUE_CAPACITY, ClientId, Frame, HubError, HubStats, Notification, NotificationHub,
    SharedNotificationHub,
};
pub use ws::{
    ClientCommand, ConnectParams, MAX_MESSAGE_SIZE, NOTIFICATIONS_PATH, PING_INTERVAL,
    READ_DEADLINE, WRITE_DEADLINE, parse_client_frame, router,
};
