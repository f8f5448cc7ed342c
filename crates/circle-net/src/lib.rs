// Discovery, session and messaging layer for proximity chat.

pub mod channel;
pub mod controller;
pub mod discovery;
pub mod loopback;
pub mod messages;
pub mod peers;
pub mod persistence;
pub mod ranging;
pub mod session;
pub mod transport;

pub use controller::{
    ControllerBuilder, ControllerCommand, ControllerConfig, ControllerError, ControllerHandle,
    SendOutcome,
};
pub use discovery::ProfileProvider;
pub use loopback::{AttachBehavior, DeviceSettings, LoopbackMedium, LoopbackTransport};
pub use peers::PeerRegistry;
pub use persistence::{HistoryScope, PersistenceQueue};
pub use ranging::{NoEstimate, PlaceholderRanging, RangingStrategy};
pub use session::LifecycleState;
pub use transport::{
    AwareTransport, Capabilities, Permissions, RangingOutcome, SessionId, SessionRole,
    TransportError, TransportEvent,
};
