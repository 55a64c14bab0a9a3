//! Clone a MySQL database by streaming `mysqldump` output into `mysql`,
//! normalizing character-set declarations on the way.

pub mod config;
pub mod copier;
pub mod dumpfile;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod rewrite;
pub mod tools;
