#![deny(clippy::unwrap_used)]

use anyhow::Context;
use log_error::LogError;
use once_cell::sync::Lazy;

pub mod archive;
pub mod bulk_upload;
pub mod category;
pub mod control;
pub mod history;
pub mod images;
pub mod product;
pub mod spreadsheet;
pub mod template;

pub static SELF_ADDR: Lazy<String> = Lazy::new(|| {
    envmnt::get_parse("SELF_ADDR")
        .context("SELF_ADDR not set")
        .log_error("Unable to get SELF_ADDR")
        .unwrap_or("0.0.0.0".to_string())
});

pub static PORT: Lazy<u16> = Lazy::new(|| {
    envmnt::get_parse("PORT")
        .context("PORT not set")
        .log_error("Unable to get PORT")
        .unwrap_or(8080)
});

/// Base URL under which uploaded product images are publicly reachable.
pub static PUBLIC_URL: Lazy<String> = Lazy::new(|| {
    envmnt::get_parse("PUBLIC_URL")
        .context("PUBLIC_URL not set")
        .log_error("Unable to get PUBLIC_URL")
        .unwrap_or_else(|| format!("http://localhost:{}", *PORT))
});

pub static ADMIN_USER: Lazy<String> = Lazy::new(|| {
    envmnt::get_parse("ADMIN_USER")
        .context("ADMIN_USER not set")
        .log_error("Unable to get ADMIN_USER")
        .unwrap_or("admin".to_string())
});

pub static ADMIN_PASSWORD: Lazy<String> = Lazy::new(|| {
    envmnt::get_parse("ADMIN_PASSWORD")
        .context("ADMIN_PASSWORD not set")
        .log_error("Unable to get ADMIN_PASSWORD")
        .unwrap_or("admin".to_string())
});
