//! Outward tool-name synthesis.
//!
//! Each discovered upstream tool is registered under a generated name:
//! `gr` (public) or `grp` (private), the 1-based index of the Space in the
//! discovery result, an underscore, then the sanitized upstream tool name.
//! The total is capped at [`MAX_TOOL_NAME_LEN`] characters; names that do
//! not fit are middle-truncated, prefixed with the tool's index within its
//! Space so truncation cannot collide.

/// Upper bound on generated tool names, imposed by downstream clients.
pub const MAX_TOOL_NAME_LEN: usize = 49;

/// Characters kept from the head of an over-long name before the cut.
const TRUNCATION_HEAD: usize = 20;

/// Generate the outward name for one upstream tool.
///
/// `space_index` and `tool_index` are 1-based.
pub fn outward_tool_name(
    private: bool,
    space_index: usize,
    tool_index: usize,
    upstream_name: &str,
) -> String {
    let prefix = if private { "grp" } else { "gr" };
    let base = format!("{prefix}{space_index}_");
    let sanitized = sanitize(upstream_name);

    let budget = MAX_TOOL_NAME_LEN.saturating_sub(base.len());
    if sanitized.len() <= budget {
        return format!("{base}{sanitized}");
    }

    // Middle truncation. The tool index keeps two long names that share a
    // 20-char head and a tail from colliding.
    let index = tool_index.to_string();
    let tail_len = budget
        .saturating_sub(index.len())
        .saturating_sub(TRUNCATION_HEAD + 1);
    let head = &sanitized[..TRUNCATION_HEAD.min(sanitized.len())];
    let tail = &sanitized[sanitized.len().saturating_sub(tail_len)..];
    format!("{base}{index}{head}_{tail}")
}

/// Whether a tool name has the outward Gradio shape (`gr<digits>_…` or
/// `grp<digits>_…`).
///
/// The stateless transport uses this to decide whether a `tools/call` can
/// skip Space discovery entirely.
pub fn is_outward_gradio_name(name: &str) -> bool {
    let rest = match name.strip_prefix("grp").or_else(|| name.strip_prefix("gr")) {
        Some(rest) => rest,
        None => return false,
    };
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && rest[digits..].starts_with('_')
}

/// Lowercase and collapse separator characters to single underscores.
///
/// The output is plain ASCII `[a-z0-9_]`, so byte and character counts
/// agree everywhere above.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out
}
