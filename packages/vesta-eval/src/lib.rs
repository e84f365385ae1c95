//! The evaluator core: a purely functional, lazily dependency-tracking DSL
//! interpreter with a persistent content-addressed memoization cache and a
//! tool-sandbox server, in the spirit of the Vesta build system.

pub mod ast;
pub mod cache;
pub mod config;
pub mod context;
pub mod dep_rescope;
pub mod deppath;
pub mod dpaths;
pub mod error;
pub mod eval;
pub mod fp;
pub mod host;
pub mod modelrun;
pub mod pickle;
pub mod runtool;
pub mod tooldir;
pub mod value;

pub use value::Value;
