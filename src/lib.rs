//! Flowdeck - control plane for an interactive interception proxy
//!
//! A protocol engine feeds observed flows into a [`session::Session`]; web
//! observers inspect, edit, hold and replay them through [`api`]. The
//! engine itself is not part of this crate. It drives the session directly
//! and is called back through [`engine::ProtocolEngine`].

pub mod api;
pub mod app;
pub mod commands;
pub mod contentview;
pub mod engine;
pub mod error;
pub mod events;
pub mod flow;
pub mod intercept;
pub mod options;
pub mod session;
pub mod store;
pub mod updates;
