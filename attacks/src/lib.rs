//! Chosen-plaintext and chosen-ciphertext attacks against block-cipher
//! modes of operation.
//!
//! The split is strict: `oracles` (and the scenario servers living next to
//! their attacks) hold the secrets and expose a narrow query surface;
//! everything in `ecb`, `cbc` and `ctr` recovers those secrets using
//! nothing but that surface. Oracle calls stand in for what would be
//! network round trips in a deployed system, so the attack code treats
//! them as the expensive resource and keeps query counts linear.

#[macro_use]
extern crate failure;

extern crate blockmodes;
extern crate rand;
extern crate serialize;
extern crate xor;

pub mod errors;
mod helper;

pub mod form;
pub mod score;

pub mod oracles;

pub mod cbc;
pub mod ctr;
pub mod ecb;
