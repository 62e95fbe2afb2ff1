//! The article publishing pipeline: slugs, excerpts, markdown rendering and
//! upload validation, tied together by [`Publisher`].

pub mod autolink;
pub mod excerpt;
pub mod highlight;
pub mod image;
pub mod markdown;
pub mod sanitize;
pub mod service;
pub mod slug;

pub use image::{DecodedImage, ImageValidator};
pub use markdown::render;
pub use service::Publisher;
pub use slug::SlugAllocator;
