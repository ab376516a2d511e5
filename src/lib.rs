//! ninefs - a pluggable virtual file system served over the 9P2000 protocol.
//!
//! The crate is organised around the [`vfs::Vfs`] trait. Three backends
//! implement it: [`dbfs::DbFs`] keeps a durable tree of chunked records in a
//! pair of [`store::RecordStore`]s, [`localfs::LocalFs`] passes through to a
//! host directory, and [`nestedfs::NestedFs`] multiplexes other backends
//! under path prefixes. The [`nine`] module exposes any backend to 9P2000
//! clients over TCP.

pub mod codec;
pub mod config;
pub mod dbfs;
pub mod localfs;
pub mod nestedfs;
pub mod nine;
pub mod store;
pub mod vfs;
