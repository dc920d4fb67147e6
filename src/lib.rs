pub mod api;
pub mod app;
pub mod console;
pub mod controller;
pub mod error;
pub mod session;
pub mod storage;
pub mod utils;
#[cfg(feature = "gui")]
pub mod ui;

pub use error::{ClientError, Result};
