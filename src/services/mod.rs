//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own account, sync, sharing, and page logic over the backend
//! traits so route handlers can stay focused on protocol translation and
//! auth plumbing.

pub mod auth;
pub mod cache;
pub mod live;
pub mod offload;
pub mod page;
pub mod sharing;
pub mod sync;
