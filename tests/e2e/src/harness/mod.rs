//! Test harness: isolated storage and a small topic/source seeding helper
//! shared by the scenario and invariant suites.

mod db_manager;

pub use db_manager::TestDatabaseManager;
