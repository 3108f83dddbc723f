use similar::{ChangeTag, TextDiff};

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Line based unified diff with 3 lines of context. `name` is used in the `a/` and `b/` headers.
/// Returns an empty string when both sides are equal.
pub fn unified_diff(old: &str, new: &str, name: &str) -> String {
    if old == new {
        return String::new();
    }

    let diff = TextDiff::from_lines(old, new);
    let mut output = format!("--- a/{name}\n+++ b/{name}\n");

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        output.push_str(&format!("{}\n", hunk.header()));
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => '-',
                ChangeTag::Insert => '+',
                ChangeTag::Equal => ' ',
            };
            output.push(sign);
            output.push_str(change.value());
            if !change.value().ends_with('\n') {
                output.push('\n');
                output.push_str(NO_NEWLINE_MARKER);
                output.push('\n');
            }
        }
    }

    output
}
