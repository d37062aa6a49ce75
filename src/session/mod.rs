pub mod login;
pub mod store;

pub use login::{LoginGate, LoginProbe, LoginStatus, ManualLogin, Unattended};
pub use store::{FileSessionBackend, MemorySessionBackend, SessionBackend, SessionStore};
