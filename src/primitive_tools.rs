//! Primitive tools that work through the [`Environment`] abstraction.
//!
//! - [`ReadTool`] - Read file contents with line numbers
//! - [`WriteTool`] - Write/create files
//! - [`EditTool`] - Exact string replacement in an existing file
//! - [`GlobTool`] - Find files by pattern
//! - [`GrepTool`] - Search file contents
//! - [`BashTool`] - Execute shell commands
//! - [`LsTool`] - List one directory
//! - [`WebFetchTool`] - Fetch a web page over HTTPS (no environment needed)
//!
//! Input reaching these tools has already been validated, sanitized and
//! security-checked by the executor.

mod bash;
mod edit;
mod glob;
mod grep;
mod ls;
mod read;
mod web_fetch;
mod write;

pub use bash::BashTool;
pub use edit::EditTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use ls::LsTool;
pub use read::ReadTool;
pub use web_fetch::{FetchFormat, WebFetchTool};
pub use write::WriteTool;

use crate::environment::Environment;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Cap on paths returned by Glob and matches returned by Grep.
pub const MAX_RESULTS: usize = 1000;

/// Register every primitive tool. All but `WebFetch` work through `environment`.
pub fn register_primitive_tools<E, Ctx>(registry: &mut ToolRegistry<Ctx>, environment: &Arc<E>)
where
    E: Environment + 'static,
    Ctx: Send + Sync + 'static,
{
    registry
        .register(ReadTool::new(Arc::clone(environment)))
        .register(WriteTool::new(Arc::clone(environment)))
        .register(EditTool::new(Arc::clone(environment)))
        .register(GlobTool::new(Arc::clone(environment)))
        .register(GrepTool::new(Arc::clone(environment)))
        .register(LsTool::new(Arc::clone(environment)))
        .register(BashTool::new(Arc::clone(environment)))
        .register(WebFetchTool::new());
}

/// Cut `s` to at most `max_bytes`, backing off to a char boundary.
pub(crate) fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use crate::tools::PrimitiveToolName;
    use crate::types::ToolCategory;

    #[test]
    fn test_register_primitive_tools() {
        let env = Arc::new(LocalFileSystem::new("/tmp"));
        let mut registry: ToolRegistry<()> = ToolRegistry::new();
        register_primitive_tools(&mut registry, &env);

        assert_eq!(
            registry.names(),
            vec!["Bash", "Edit", "Glob", "Grep", "Ls", "Read", "WebFetch", "Write"]
        );
        assert_eq!(registry.category_of("Read"), ToolCategory::Read);
        assert_eq!(registry.category_of("Edit"), ToolCategory::Write);
        assert_eq!(registry.category_of("Bash"), ToolCategory::Execute);
        assert_eq!(registry.category_of("WebFetch"), ToolCategory::Network);
        assert!(registry.contains(&crate::tools::tool_name_to_string(&PrimitiveToolName::Grep)));
    }

    #[test]
    fn test_truncate_bytes_respects_char_boundary() {
        assert_eq!(truncate_bytes("hello", 10), "hello");
        assert_eq!(truncate_bytes("hello", 3), "hel");
        // 'é' is two bytes; cutting inside it backs off.
        assert_eq!(truncate_bytes("aé", 2), "a");
    }
}
