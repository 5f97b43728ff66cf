pub mod clock;
pub mod entities;
pub mod repositories;
pub mod requests;
pub mod value_objects;

// SQLx 实现（仅在启用 sqlx-support feature 时编译）
#[cfg(feature = "sqlx-support")]
pub mod sqlx_impls;

pub use clock::*;
pub use courier_errors::{ErrorKind, SchedulerError, SchedulerResult};
pub use entities::*;
pub use repositories::*;
pub use requests::*;
pub use value_objects::*;
