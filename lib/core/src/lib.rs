//! Core types shared by every authgate crate.
//!
//! This crate provides the [`SessionState`] value object: the identity
//! carried by a session cookie.

pub mod session;

pub use session::SessionState;
