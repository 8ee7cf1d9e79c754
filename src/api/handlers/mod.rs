//! REST endpoint handlers organized by resource.

pub mod account;
pub mod feed;
pub mod lease;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(lease::routes())
        .merge(account::routes())
        .merge(feed::routes())
        .merge(system::routes())
}
