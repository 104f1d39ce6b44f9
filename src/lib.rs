//! A library and application for flashing TI CC13xx/CC26xx devices over the
//! ROM serial bootloader
//!
//! The core of the library turns the loadable segments of an ELF image into a
//! sequence of bootloader operations (erase, download, send data, status
//! check) and verifies the written flash against a CRC-32 computed on the
//! host. The device itself is reached through the [flasher::Device] trait, so
//! the core can be driven by any implementation of the bootloader protocol.
//!
//! ## As an application
//!
//! [ccflash] can be installed using `cargo install`:
//!
//! ```bash
//! $ cargo install ccflash
//! ```
//!
//! ## As a library
//!
//! [ccflash] can be used as a library in other applications:
//!
//! ```toml
//! ccflash = { version = "0.1", default-features = false, features = ["serialport"] }
//! ```
//!
//! We add `default-features` here to disable the `cli` feature, which is
//! enabled by default. It's important to note that the cli module does not
//! provide SemVer guarantees.
//!
//! [ccflash]: https://crates.io/crates/ccflash

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use self::{
    elf::{FirmwareImage, Segment},
    error::Error,
    flasher::{Device, Flasher},
};

#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod cli;
pub mod command;
#[cfg(feature = "serialport")]
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
pub mod connection;
pub mod elf;
pub mod error;
pub mod flasher;
#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod logging;
