//! Textual three-way merge of blob content.
//!
//! Lines keep their terminators through the merge so unchanged regions
//! are reproduced byte for byte. Conflicting regions are formatted
//! diff3-style with the configured marker labels.

use merge3::{Merge3, MergeGroup};

use super::conflict::ConflictMarkers;

/// Merge two revisions of a text against their common base.
///
/// Returns the merged bytes and whether any conflict hunks were
/// formatted into them. Content that does not decode as UTF-8 is
/// treated as empty.
pub(crate) fn merge_text(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    markers: &ConflictMarkers,
) -> (Vec<u8>, bool) {
    let base_text = std::str::from_utf8(base).unwrap_or("");
    let our_text = std::str::from_utf8(ours).unwrap_or("");
    let their_text = std::str::from_utf8(theirs).unwrap_or("");

    let base_lines = split_lines(base_text);
    let our_lines = split_lines(our_text);
    let their_lines = split_lines(their_text);

    let m3 = Merge3::new(&base_lines, &our_lines, &their_lines);
    let groups = m3.merge_groups();

    let mut out = Vec::new();
    let mut has_conflicts = false;
    for group in &groups {
        match group {
            MergeGroup::Unchanged(lines)
            | MergeGroup::Same(lines)
            | MergeGroup::A(lines)
            | MergeGroup::B(lines) => push_lines(&mut out, lines),
            MergeGroup::Conflict(base_lines, a_lines, b_lines) => {
                has_conflicts = true;
                format_conflict(&mut out, base_lines, a_lines, b_lines, markers);
            }
        }
    }
    (out, has_conflicts)
}

/// Split text into lines, each keeping its trailing newline if present.
fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == '\n' {
            lines.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn push_lines(out: &mut Vec<u8>, lines: &[&str]) {
    for line in lines {
        out.extend_from_slice(line.as_bytes());
    }
}

/// Ensure each line of a conflict section ends with a newline so the
/// markers stay on their own lines.
fn push_terminated_lines(out: &mut Vec<u8>, lines: &[&str]) {
    for line in lines {
        out.extend_from_slice(line.as_bytes());
        if !line.ends_with('\n') {
            out.push(b'\n');
        }
    }
}

fn format_conflict(
    out: &mut Vec<u8>,
    base_lines: &Option<&[&str]>,
    our_lines: &[&str],
    their_lines: &[&str],
    markers: &ConflictMarkers,
) {
    out.extend_from_slice(format!("<<<<<<< {}\n", markers.ours).as_bytes());
    push_terminated_lines(out, our_lines);
    if let Some(base) = base_lines {
        out.extend_from_slice(format!("||||||| {}\n", markers.base).as_bytes());
        push_terminated_lines(out, base);
    }
    out.extend_from_slice(b"=======\n");
    push_terminated_lines(out, their_lines);
    out.extend_from_slice(format!(">>>>>>> {}\n", markers.theirs).as_bytes());
}
