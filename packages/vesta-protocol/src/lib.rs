//! Shared wire types and interface traits for the evaluator's two external
//! collaborators: the remote application cache and the repository.
//!
//! Types are always available; both modules also ship one in-process test
//! double ([`cache::MemoryCache`], [`repo::InMemoryRepository`]) so the
//! evaluator's protocol logic can be exercised without a real cache server or
//! repository process, matching the role `clients` plays for `hurry` and
//! `courier` in the teacher crate.

pub mod cache;
pub mod path;
pub mod repo;
pub mod tag;

pub use tag::Tag;
