pub mod docsession;
pub mod sessionmgr;
pub mod wshost;

pub use docsession::{render_view, DocumentSession, SessionContext, SyncSettings};
pub use sessionmgr::{Closable, SessionManager};
