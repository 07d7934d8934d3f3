//! Driver layer for browser automation.
//!
//! This crate exposes the page capability the acquisition pipeline drives,
//! plus its WebDriver-backed implementation.
//!
//! - [`browser::BrowserPage`] / [`browser::PageLauncher`]: the capability seams
//! - [`browser::driver::ProbeDriver`]: WebDriver client wrapper and launcher
//! - [`browser::page::ProbePage`]: form, wait, screenshot and extraction helpers
//! - [`browser::tap`]: in-page response recording drained into a channel
pub mod browser;
