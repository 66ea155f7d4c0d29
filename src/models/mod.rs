//! Data models for Bookshelf

pub mod book;
pub mod pagination;
pub mod token;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookQuery};
pub use pagination::{Paginated, Pagination};
pub use token::{TokenKind, TokenRecord};
pub use user::{User, UserSummary};
