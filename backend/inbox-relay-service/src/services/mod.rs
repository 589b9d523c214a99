pub mod fanout;
pub mod presence;
pub mod session_manager;
pub mod unread;

pub use fanout::{EventClass, FanoutRouter, RelayEvent};
pub use presence::{DisconnectOutcome, PresenceCoordinator, PRESENCE_ROUTING_KEY};
pub use session_manager::{SessionManager, NOTIFICATION_ROUTING_KEY};
pub use unread::{
    provider_from_config, HttpUnreadCountProvider, UnavailableUnreadCountProvider,
    UnreadCountProvider,
};
