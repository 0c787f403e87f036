//! WebSocket gateway: one reader and one writer task per connection.

pub mod session;
