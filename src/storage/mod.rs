pub mod batch;
pub mod catalog;

pub use self::batch::{delete_partials, merge, write_records, write_summary};
pub use self::catalog::Repository;
