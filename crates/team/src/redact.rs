//! Output redaction for agent results.
//!
//! The Architect and FinalEditor prompts embed a large authored guidance
//! block, and models like to echo it. Before a step result is returned
//! or published, every known guidance literal is replaced with a short
//! placeholder, and anything past the result ceiling is truncated with a
//! visible marker. The literals live in one registry here so new
//! guidance blocks get redacted by adding a single entry.

use crate::roles::STRUCTURED_DIAGRAM_GUIDANCE;

/// Hard ceiling on a step result, in characters.
pub const MAX_RESULT_CHARS: usize = 25_000;

/// Cap on delta payloads published to subscribers, in characters.
pub const TRACE_DELTA_CHARS: usize = 1_200;

const TRUNCATION_SUFFIX: &str = "\n\n[... output truncated ...]";

/// The redaction registry: `(placeholder, literal)` pairs.
fn redactable_blocks() -> &'static [(&'static str, &'static str)] {
    &[(
        "[REDACTED STRUCTURED DIAGRAM GUIDANCE]",
        STRUCTURED_DIAGRAM_GUIDANCE,
    )]
}

/// Replace embedded guidance literals and enforce the result ceiling.
pub fn redact_guidance(text: &str) -> String {
    let mut out = text.to_owned();
    for (placeholder, literal) in redactable_blocks() {
        if !literal.is_empty() && out.contains(literal) {
            out = out.replace(literal, placeholder);
        }
    }
    if out.chars().count() > MAX_RESULT_CHARS {
        let mut truncated: String = out.chars().take(MAX_RESULT_CHARS).collect();
        truncated.push_str(TRUNCATION_SUFFIX);
        return truncated;
    }
    out
}

/// Shorten a delta for publication on the trace bus. Char-boundary safe.
pub fn shorten_for_tracing(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...[TRUNCATED]");
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
