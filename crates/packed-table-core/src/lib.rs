//! Core engine for a packed columnar table format.
//!
//! This crate provides the foundational pieces for `packed-table-format`:
//!
//! - A size-based splitter that partitions a logical schema's columns into
//!   column groups from one sample batch (`splitter` module).
//! - A bounded-memory packed writer that streams logical row batches into
//!   one Parquet file per column group (`writer` module).
//! - A packed record-batch reader that reassembles an arbitrary projection
//!   of the logical table from the group files, driven by an externally
//!   supplied column offset mapping (`reader` module).
//! - The shared column group model: `ColumnGroup` and `ColumnOffset`
//!   (`group` module).
//! - Filesystem utilities for creating and opening group files under a
//!   table location (`storage` module).
//!
//! The writer decides physical layout; it persists no manifest. Callers
//! record the `ColumnOffset` mapping exposed after the split decision and
//! hand it back when constructing a reader. Higher-level integration crates
//! (for example, a query engine binding or a CLI) are expected to depend on
//! this core crate rather than re-implementing the packing logic.
#![deny(missing_docs)]
pub mod error;
pub mod group;
pub mod reader;
pub mod splitter;
pub mod storage;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_util;
