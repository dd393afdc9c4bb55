//! Command-line driver for auditing the supply-chain integrity of hosted Git
//! repositories. The heavy lifting lives in the support library; this crate
//! wires the subcommands to it.

#![warn(missing_docs)]
#![warn(
    clippy::all,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro
)]
#![allow(clippy::too_many_arguments, clippy::blocks_in_conditions)]

pub mod commands;
