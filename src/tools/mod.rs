pub mod compute;
pub mod registry;
pub mod traits;

pub use compute::ComputeTool;
pub use registry::ToolRegistry;
pub use traits::{Tool, ToolOutcome, ToolSpec};
