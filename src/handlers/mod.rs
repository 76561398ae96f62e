pub mod doc_create;
pub mod doc_links;
pub mod doc_open;
pub mod health;
pub mod presence;

pub use doc_create::*;
pub use doc_links::*;
pub use doc_open::*;
pub use health::*;
pub use presence::*;
