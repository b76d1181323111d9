pub mod error;
pub mod history;
pub mod notify;
pub mod session;

pub use error::SessionError;
pub use history::History;
pub use notify::{NotifierChain, NowPlayingCard, NowPlayingNotifier};
pub use session::{
    AdvanceOutcome, ConnectionState, EnqueueResult, Session, SessionConfig, SessionEvent,
    SessionUpdate, Snapshot,
};
