//! A content sharing server with versioned, forkable relics

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod admin;
pub mod backup;
pub mod blobs;
pub mod bookmarks;
pub mod clients;
pub mod comments;
pub mod config;
pub mod diff;
pub mod error;
pub mod expiry;
pub mod http;
pub mod id;
pub mod metrics;
pub mod models;
pub mod password;
pub mod relics;
pub mod reports;
pub mod server;
pub mod state;
pub mod store;
pub mod sweep;
