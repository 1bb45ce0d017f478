//! Log sanitization for raw serial lines. A glitching CUL stick can emit
//! arbitrary bytes; keep them on one log line and printable.

/// Escape a raw line for single-line logging: control characters become
/// `\xNN` escapes (`\n`, `\r`, `\t` get their short forms), backslashes are
/// doubled, and long lines are truncated with an ellipsis.
pub fn escape_log(line: &str) -> String {
    const MAX_PREVIEW: usize = 120; // frames are short; anything longer is noise
    let mut out = String::with_capacity(line.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in line.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
