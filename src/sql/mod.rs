pub mod mappings;
pub mod prompt;
pub mod repair;

pub use prompt::{build_sql_prompt, build_summary_prompt};
pub use repair::extract_and_repair_sql;
