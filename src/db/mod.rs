// ABOUTME: Database module exports for Mongo Warden
// ABOUTME: Contains the SQLite server registry and MongoDB connection management

pub mod mongo;
pub mod registry;

pub use mongo::MongoServer;
pub use registry::RegistryStore;
