//! Adaptive parent/child chunking (SPEC_FULL.md §4.1).
//!
//! Generalizes the teacher's paragraph-boundary chunker (`chunk_text`, single fixed `max_tokens`) into
//! a type-adaptive profile table: each [`SourceType`](crate::models::SourceType) gets its own target
//! size, overlap, splitter strategy, and optional parent/child split. `make_chunk`'s sha256-hash /
//! uuid-id convention is unchanged.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{ChunkProfile, SplitterKind};
use crate::models::Chunk;

const RECURSIVE_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Result of chunking one document: parents (may be empty, when the profile has no parent window)
/// and children. Children are what get embedded and retrieved; `child.parent_id` points into
/// `parents` when present.
pub struct ChunkedDocument {
    pub parents: Vec<Chunk>,
    pub children: Vec<Chunk>,
}

/// Chunk a document's plain-text body according to `profile`.
pub fn chunk_document(
    document_id: &str,
    user_id: &str,
    text: &str,
    profile: &ChunkProfile,
) -> ChunkedDocument {
    if text.trim().is_empty() {
        let only = make_chunk(document_id, user_id, 0, text, None);
        return ChunkedDocument { parents: Vec::new(), children: vec![only] };
    }

    if profile.parent_window_multiplier == 0 {
        let pieces = split(text, profile);
        let overlapped = apply_overlap(&pieces, profile.overlap_chars);
        let children = overlapped
            .iter()
            .enumerate()
            .map(|(i, t)| make_chunk(document_id, user_id, i as i64, t, None))
            .collect();
        return ChunkedDocument { parents: Vec::new(), children };
    }

    let parent_target = profile.target_chars * profile.parent_window_multiplier;
    let parent_profile = ChunkProfile {
        target_chars: parent_target,
        overlap_chars: 0,
        splitter: profile.splitter,
        parent_window_multiplier: 0,
    };
    let parent_pieces = split(text, &parent_profile);

    let mut parents = Vec::with_capacity(parent_pieces.len());
    let mut children = Vec::new();
    for (pi, parent_text) in parent_pieces.iter().enumerate() {
        let parent = make_chunk(document_id, user_id, pi as i64, parent_text, None);
        let child_pieces = split(parent_text, profile);
        let overlapped = apply_overlap(&child_pieces, profile.overlap_chars);
        for child_text in &overlapped {
            let idx = children.len() as i64;
            children.push(make_chunk(document_id, user_id, idx, child_text, Some(parent.id.clone())));
        }
        parents.push(parent);
    }

    ChunkedDocument { parents, children }
}

fn split(text: &str, profile: &ChunkProfile) -> Vec<String> {
    match profile.splitter {
        SplitterKind::Semantic => semantic_split(text, profile.target_chars),
        SplitterKind::Recursive => recursive_split(text, profile.target_chars, RECURSIVE_SEPARATORS),
        SplitterKind::RecursiveBlockAware => {
            block_aware_split(text, profile.target_chars)
        }
    }
}

/// Prefers heading boundaries, then paragraph boundaries, keeping pieces within ±25% of target.
/// Equation blocks (`$$...$$`, `\[...\]`) are never split across a boundary (Open Question decision,
/// see DESIGN.md).
fn semantic_split(text: &str, target: usize) -> Vec<String> {
    let lower_bound = (target as f64 * 0.75) as usize;
    let upper_bound = (target as f64 * 1.25) as usize;

    let blocks = split_protecting_equations(text);
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for block in blocks {
        let candidate_len = buf.len() + block.len();
        if !buf.is_empty() && candidate_len > upper_bound {
            let is_heading = is_heading_line(&block);
            if buf.len() >= lower_bound || is_heading {
                pieces.push(std::mem::take(&mut buf));
            }
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(&block);

        if buf.len() > upper_bound {
            // Single block already over budget; fall back to recursive splitting of just this block.
            let tail = recursive_split(&buf, target, RECURSIVE_SEPARATORS);
            pieces.extend(tail);
            buf.clear();
        }
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }
    pieces
}

pub(crate) fn is_heading_line(block: &str) -> bool {
    let first_line = block.lines().next().unwrap_or("");
    let trimmed = first_line.trim();
    if trimmed.starts_with('#') {
        return true;
    }
    !trimmed.is_empty()
        && trimmed.len() < 80
        && trimmed
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false)
        && !trimmed.ends_with('.')
}

/// Splits `\n\n`-separated blocks but keeps `$$...$$` / `\[...\]` equation blocks intact.
fn split_protecting_equations(text: &str) -> Vec<String> {
    let raw: Vec<&str> = text.split("\n\n").collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        let block = raw[i].trim();
        if block.is_empty() {
            i += 1;
            continue;
        }
        if is_equation_open(block) && !is_equation_closed(block) {
            let mut merged = block.to_string();
            let mut j = i + 1;
            while j < raw.len() && !is_equation_closed(&merged) {
                merged.push_str("\n\n");
                merged.push_str(raw[j].trim());
                j += 1;
            }
            out.push(merged);
            i = j;
        } else {
            out.push(block.to_string());
            i += 1;
        }
    }
    out
}

fn is_equation_open(block: &str) -> bool {
    block.starts_with("$$") || block.starts_with("\\[")
}

fn is_equation_closed(block: &str) -> bool {
    let trimmed = block.trim_end();
    (block.starts_with("$$") && trimmed.ends_with("$$") && trimmed.len() > 2)
        || (block.starts_with("\\[") && trimmed.ends_with("\\]"))
}

/// Peels separators in order, never exceeding `1.5x` target per piece.
fn recursive_split(text: &str, target: usize, separators: &[&str]) -> Vec<String> {
    let max_chars = (target as f64 * 1.5) as usize;
    recursive_split_inner(text.trim(), max_chars, separators)
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
        .collect()
}

fn recursive_split_inner(text: &str, max_chars: usize, separators: &[&str]) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }
    let Some((sep, rest)) = separators.split_first() else {
        return hard_split(text, max_chars);
    };

    let parts: Vec<&str> = text.split(sep).collect();
    if parts.len() == 1 {
        return recursive_split_inner(text, max_chars, rest);
    }

    let mut out = Vec::new();
    let mut buf = String::new();
    for part in parts {
        let would_be = if buf.is_empty() { part.len() } else { buf.len() + sep.len() + part.len() };
        if would_be > max_chars && !buf.is_empty() {
            out.extend(recursive_split_inner(&buf, max_chars, rest));
            buf.clear();
        }
        if !buf.is_empty() {
            buf.push_str(sep);
        }
        buf.push_str(part);
    }
    if !buf.is_empty() {
        out.extend(recursive_split_inner(&buf, max_chars, rest));
    }
    out
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let split_at = remaining.len().min(max_chars.max(1));
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let actual_split = actual_split.max(1).min(remaining.len());
        out.push(remaining[..actual_split].trim().to_string());
        remaining = &remaining[actual_split..];
    }
    out
}

/// Recursive split with code fences (```` ``` ````) treated as unsplittable blocks, before falling
/// back to the normal separator peeling inside prose stretches.
fn block_aware_split(text: &str, target: usize) -> Vec<String> {
    let max_chars = (target as f64 * 1.5) as usize;
    let mut segments = Vec::new();
    let mut in_fence = false;
    let mut buf = String::new();
    for line in text.lines() {
        let is_fence_line = line.trim_start().starts_with("```");
        if is_fence_line {
            buf.push_str(line);
            buf.push('\n');
            if in_fence {
                segments.push((true, std::mem::take(&mut buf)));
            }
            in_fence = !in_fence;
            continue;
        }
        buf.push_str(line);
        buf.push('\n');
        if !in_fence && buf.len() > max_chars {
            segments.push((false, std::mem::take(&mut buf)));
        }
    }
    if !buf.is_empty() {
        segments.push((in_fence, buf));
    }

    let mut out = Vec::new();
    let mut carry = String::new();
    for (is_code, seg) in segments {
        if is_code {
            if !carry.is_empty() {
                out.extend(recursive_split(&carry, target, RECURSIVE_SEPARATORS));
                carry.clear();
            }
            out.push(seg.trim_end().to_string());
        } else {
            carry.push_str(&seg);
            if carry.len() > max_chars {
                out.extend(recursive_split(&carry, target, RECURSIVE_SEPARATORS));
                carry.clear();
            }
        }
    }
    if !carry.trim().is_empty() {
        out.extend(recursive_split(&carry, target, RECURSIVE_SEPARATORS));
    }
    out.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

/// Repeats the last `overlap` characters of piece `k` at the start of piece `k+1`, cutting at a word
/// boundary so a whole sentence is never duplicated twice.
fn apply_overlap(pieces: &[String], overlap: usize) -> Vec<String> {
    if overlap == 0 || pieces.len() < 2 {
        return pieces.to_vec();
    }
    let mut out = Vec::with_capacity(pieces.len());
    out.push(pieces[0].clone());
    for i in 1..pieces.len() {
        let prev = &pieces[i - 1];
        let tail_start = prev.len().saturating_sub(overlap);
        let tail_start = prev[tail_start..]
            .find(' ')
            .map(|p| tail_start + p + 1)
            .unwrap_or(tail_start);
        let tail = &prev[tail_start..];
        if tail.is_empty() || pieces[i].starts_with(tail) {
            out.push(pieces[i].clone());
        } else {
            out.push(format!("{} {}", tail.trim(), pieces[i]));
        }
    }
    out
}

fn make_chunk(
    document_id: &str,
    user_id: &str,
    ordinal: i64,
    text: &str,
    parent_id: Option<String>,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        user_id: user_id.to_string(),
        ordinal,
        text: text.to_string(),
        page: None,
        section_title: None,
        parent_id,
        hash,
    }
}
