pub mod badge;
pub mod hub;
pub mod protocol;
pub mod session;
pub mod sync;

pub use badge::BadgeIndicator;
pub use hub::{Envelope, FrameId, FramePort, MessageHub, TabId, PRIMARY_FRAME};
pub use protocol::{ContentMessage, ReadingModeChanged};
pub use session::SessionState;
pub use sync::{BridgeError, SyncBridge, ToggleAck};
