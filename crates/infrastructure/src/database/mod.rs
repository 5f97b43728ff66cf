pub mod sqlite;

pub use sqlite::{
    DatabaseManager, SqliteActivityRepository, SqliteCourierRepository,
    SqliteScheduleEntryRepository,
};
