//! Session coordination: credential attachment, single-flight token refresh,
//! forced logout, and the observable state the view layer renders from.

pub mod context;
pub mod coordinator;
pub mod routes;

pub use context::{LogoutStatus, SessionContext, SessionState};
pub use coordinator::{SessionCoordinator, TerminationReason};
pub use routes::{MemoryNavigator, Navigator, PublicPredicate, PublicRoutes, SessionRoutes};
