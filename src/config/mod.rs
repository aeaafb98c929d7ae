pub mod schema;

pub use schema::{BudgetConfig, Config, ExecutorSettings, TierConfig, TiersConfig};
