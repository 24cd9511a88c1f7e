use std::collections::VecDeque;

const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Splits `text` into pieces of at most `max_chars` characters, preferring
/// paragraph, then line, then sentence, then word boundaries. Consecutive
/// pieces share up to `overlap_chars` characters of trailing context.
pub(super) fn split_recursive(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(trimmed) <= max_chars {
        return vec![trimmed.to_string()];
    }

    split_with(trimmed, &SEPARATORS, max_chars, overlap_chars)
        .into_iter()
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn split_with(text: &str, separators: &[&str], max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split_inclusive(separator).map(ToOwned::to_owned).collect()
    };

    let mut out = Vec::<String>::new();
    let mut fitting = Vec::<String>::new();
    for piece in pieces {
        if char_len(&piece) <= max_chars {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge_pieces(std::mem::take(&mut fitting), max_chars, overlap_chars));
        }
        if finer.is_empty() {
            out.push(piece);
        } else {
            out.extend(split_with(&piece, finer, max_chars, overlap_chars));
        }
    }
    if !fitting.is_empty() {
        out.extend(merge_pieces(fitting, max_chars, overlap_chars));
    }
    out
}

/// Greedily packs pieces into windows. When a window is emitted, pieces are
/// dropped from its front until at most `overlap_chars` remain to seed the
/// next window.
fn merge_pieces(pieces: Vec<String>, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut out = Vec::<String>::new();
    let mut window = VecDeque::<String>::new();
    let mut window_len = 0usize;

    for piece in pieces {
        let piece_len = char_len(&piece);
        if window_len + piece_len > max_chars && !window.is_empty() {
            out.push(window.iter().map(String::as_str).collect());
            while window_len > overlap_chars
                || (window_len > 0 && window_len + piece_len > max_chars)
            {
                match window.pop_front() {
                    Some(dropped) => window_len -= char_len(&dropped),
                    None => break,
                }
            }
        }
        window_len += piece_len;
        window.push_back(piece);
    }

    if !window.is_empty() {
        out.push(window.iter().map(String::as_str).collect());
    }
    out
}

pub(super) fn char_len(text: &str) -> usize {
    text.chars().count()
}
