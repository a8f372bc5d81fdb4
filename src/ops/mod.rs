// ABOUTME: Operation modules for Mongo Warden
// ABOUTME: Probing, switching, synchronization, backup, and document viewing

pub mod backup;
pub mod probe;
pub mod switch;
pub mod sync;
pub mod viewer;
