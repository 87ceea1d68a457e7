//! Client side of the complaint chat: session handling, the backend seam
//! and the realtime/polling chat feed.

pub mod backend;
pub mod error;
pub mod feed;
pub mod http;
pub mod session;

pub use backend::{ChatBackend, FeedQuery, FeedTarget};
pub use error::{BackendError, FeedError};
pub use feed::{ChatFeed, FeedConfig, FeedMode, FeedView, extract_index_link};
pub use http::HttpBackend;
pub use session::{Gate, Session, gate};
