pub mod provider;
pub mod session;
pub mod store;

pub use provider::{SessionContext, SessionProvider};
pub use store::SessionStore;
