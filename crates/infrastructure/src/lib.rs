pub mod database;
pub mod in_memory;
pub mod observability;

pub use database::*;
pub use in_memory::{
    InMemoryActivityRepository, InMemoryCourierRepository, InMemoryScheduleEntryRepository,
};
pub use observability::*;
