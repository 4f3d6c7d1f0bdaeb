//! Core building blocks of a warren node.
//!
//! A warren node retrieves content-addressed blocks for clients. This crate
//! holds the slice of the node between request registration and network
//! fetch:
//!
//! - [`keys`]: the two kinds of content-addressed key and their
//!   self-verifying blocks. An SSK block carries a DSA signature over a
//!   layered SHA-256 hash and is verified against the publisher's public key
//!   before it is admitted; see [`keys::SskBlock`].
//! - [`checker`]: the datastore checker, which probes the local store for
//!   each pending request's keys, trips waiting requests with found blocks,
//!   and hands the remainder back for network fetch; see
//!   [`checker::DatastoreChecker`].
//! - [`store`], [`db`], [`jobs`], [`request`]: the seams to the node's block
//!   store, the durable item database and its single-consumer executor, and
//!   the request scheduler.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod checker;
pub mod crypt;
pub mod db;
pub mod jobs;
pub mod keys;
pub mod request;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::keys::{Block, Key};
