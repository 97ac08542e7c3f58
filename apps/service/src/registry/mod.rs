//! Catalog population from the bulk registry snapshot.

pub mod reader;
pub mod updater;

pub use reader::RegistryReader;
pub use updater::RegistryUpdater;
