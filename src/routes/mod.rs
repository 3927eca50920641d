pub mod microsub;
pub mod opml;
pub mod webmention;
pub mod websub;
