//! Audiobook metadata lookup against the Audible catalog.
//!
//! A title/author search (or a known ASIN) yields candidate ids; each
//! candidate's Audnexus detail document is fetched concurrently and mapped to
//! a [`record::MetadataRecord`] that is pushed into a host-provided sink.

pub mod config;
pub mod cover;
pub mod detail;
pub mod error;
pub mod genres;
pub mod identify;
pub mod ports;
pub mod query;
pub mod record;
pub mod tasks;

#[cfg(test)]
mod test_support;
