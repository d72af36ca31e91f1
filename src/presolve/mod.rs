//! # Presolving
//!
//! The concurrency and conflict resolution machinery that drives presolve: presolve methods run
//! in parallel against a frozen problem and emit transactions into private reduction logs; a
//! deterministic, single threaded applier serializes compatible transactions and rejects
//! conflicting ones; a fixed point loop advances rounds until nothing changes or a budget runs
//! out. Every accepted reduction is mirrored into the postsolve trace and, optionally, into a
//! proof certificate.
pub mod apply;
pub mod certificate;
pub mod methods;
pub mod options;
pub mod postsolve;
pub mod presolver;
pub mod reductions;
pub mod scheduler;

pub use certificate::{Certificate, NoCertificate, PseudoBoolean};
pub use options::PresolveOptions;
pub use postsolve::{PostsolveEntry, PostsolveTrace};
pub use presolver::{Abort, Presolver, PresolverStatus, Scope, Timing};
pub use reductions::Reductions;
pub use scheduler::{Presolve, PresolveResult, PresolveStatus, Statistics};
