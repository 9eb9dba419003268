//! In-memory fakes and fixtures for exercising the engine without a remote.

pub mod fake_remote;
pub mod fixtures;

pub use fake_remote::FakeRemoteCatalog;
pub use fixtures::Harness;
