//! CLI command implementations.
//!
//! | Module  | Responsibility                                        |
//! |---------|-------------------------------------------------------|
//! | `recon` | Load the scene, run the batch, report and save views  |

pub mod recon;

pub use recon::cmd_reconstruct;
