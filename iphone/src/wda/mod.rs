//! Device control over the WebDriverAgent REST protocol.

pub mod actions;
pub mod client;

pub use client::{text_predicate, ElementInfo, ScreenSize, WdaClient};
