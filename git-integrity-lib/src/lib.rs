//! Core functionality for git-integrity: reconciling the commits reachable on
//! a branch with the merged pull requests recorded by the hosting forge, in
//! order to find commits which landed without going through a reviewed pull
//! request.

#![warn(missing_docs)]
#![warn(
    clippy::all,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro
)]
#![allow(clippy::too_many_arguments, clippy::blocks_in_conditions)]

pub mod audit;
pub mod core;
pub mod git;
pub mod github;
pub mod testing;
