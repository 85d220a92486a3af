//! WebSocket module for push-stream connection management

mod client;
mod state;
mod subscriber;

pub use client::{Incoming, TungsteniteConnector, WebSocketClient};
pub use state::{next_reconnect, reconnect_delay, CloseAction, ConnectionState, ConnectionStatus};
pub use subscriber::{
    StreamChannel, StreamConnection, StreamConnector, StreamEvent, StreamHandle,
    StreamSubscriber, SubscriberSettings,
};
