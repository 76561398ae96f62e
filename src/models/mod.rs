pub mod api;
pub mod document;
pub mod error;
pub mod health;
pub mod identity;
pub mod messages;
pub mod view;

pub use api::*;
pub use document::*;
pub use error::*;
pub use health::*;
pub use identity::*;
pub use view::*;
