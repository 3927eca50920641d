pub mod cursor;
pub mod middleware;
pub mod opml;
pub mod sanitize;
pub mod serde_helpers;
pub mod shortid;
