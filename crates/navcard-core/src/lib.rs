//! navcard-core - Core library for navigation data card programming
//!
//! This crate holds everything that does not touch a real USB stack:
//!
//! - [`transport`] - the endpoint transport seam (control/bulk transfers,
//!   bus rescans) and the injectable clock
//! - [`identity`] - USB identities of the supported programmers
//! - [`firmware`] - anchor-download firmware images and the stager that
//!   brings uninitialized programmers to their operational firmware
//! - [`geometry`] - card identification and logical-to-physical translation
//! - [`programmer`] - the trait programmer drivers implement
//! - [`engine`] - the detect/blank-check/erase/write/verify/read engine
//! - [`metadata`] - the legacy `{cycle~serviceId}` record
//!
//! It is `no_std` (with `alloc`) so the same engine can be driven by
//! the in-memory emulators in `navcard-dummy`.
//!
//! # Example
//!
//! ```ignore
//! use navcard_core::engine::{self, NoProgress, WriteOptions};
//! use navcard_core::programmer::CardProgrammer;
//!
//! fn program<P: CardProgrammer>(prog: &mut P, image: &[u8]) -> navcard_core::Result<()> {
//!     let geometry = engine::detect(prog)?;
//!     engine::write(prog, &geometry, image, &WriteOptions::default(), &mut NoProgress)
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod engine;
pub mod error;
pub mod firmware;
pub mod geometry;
pub mod identity;
pub mod metadata;
pub mod programmer;
pub mod transport;

pub use error::{Error, Result};
