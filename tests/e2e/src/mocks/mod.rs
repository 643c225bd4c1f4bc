//! Fixture factories shared by the scenario and invariant suites.

mod fixtures;

pub use fixtures::CandidateFactory;
