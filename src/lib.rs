#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod autocomplete;
pub mod comments;
pub mod composer;
pub mod config;
pub mod data;
pub mod debounce;
pub mod dispatch;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod markup;
pub mod media;
pub mod model;
pub mod picker;
pub mod preferences;
pub mod storage;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
