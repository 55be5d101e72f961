//! Feedwatch polls RSS/Atom feeds on behalf of chat rooms and delivers
//! only the entries each room has not seen yet.
//!
//! The moving parts, leaves first: [`creds`] resolves a feed URL to a
//! credential rule, [`auth`] turns a rule into an authenticated fetch
//! context, [`fetch`] retrieves and parses feeds with a bounded retry
//! budget, [`storage`] persists the subscription registry and per-room
//! watermarks, [`poller`] runs one delivery cycle, and [`scheduler`]
//! decides when the next cycle happens.

pub mod auth;
pub mod config;
pub mod creds;
pub mod fetch;
pub mod poller;
pub mod scheduler;
pub mod storage;
pub mod util;
