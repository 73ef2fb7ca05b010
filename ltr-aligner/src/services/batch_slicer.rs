//! Batch slicing
//!
//! Batch `i` covers source lines `[i*n, (i+1)*n)`. Its target range is the
//! proportional position in the target document widened by `window` on both
//! sides and moved by `shift`:
//!
//! ```text
//! k     = len_to / len_from
//! start = floor(i*n*k)
//! to    = [max(0, start - window + shift), min(len_to, start + floor(n*k) + window + shift))
//! ```

use super::alignment_store::{DocumentLines, StoredLine};
use crate::models::{AlignParams, BatchWorkItem};

/// Build work items for `batch_ids`, in the given order
pub fn slice_batches(
    doc: &DocumentLines,
    batch_size: usize,
    batch_ids: &[u32],
    params: &AlignParams,
) -> Vec<BatchWorkItem> {
    batch_ids
        .iter()
        .map(|&batch_id| slice_one(doc, batch_size, batch_id, params))
        .collect()
}

fn slice_one(doc: &DocumentLines, n: usize, batch_id: u32, params: &AlignParams) -> BatchWorkItem {
    let len_from = doc.from.len();
    let len_to = doc.to.len();
    let i = batch_id as usize;

    let from_start = (i * n).min(len_from);
    let from_end = ((i + 1) * n).min(len_from);

    let (to_start, to_end) = target_range(len_from, len_to, n, i, params.window, params.shift);

    let proxy_from = proxy_slice(&doc.proxy_from, from_start, from_end);
    let proxy_to = proxy_slice(&doc.proxy_to, to_start, to_end);

    let (lines_from, line_ids_from) = split_lines(&doc.from[from_start..from_end]);
    let (lines_to, line_ids_to) = split_lines(&doc.to[to_start..to_end]);

    BatchWorkItem {
        batch_id,
        lines_from,
        lines_to,
        line_ids_from,
        line_ids_to,
        proxy_from,
        proxy_to,
        shift: params.shift,
        window: params.window,
    }
}

fn target_range(
    len_from: usize,
    len_to: usize,
    n: usize,
    i: usize,
    window: u32,
    shift: i64,
) -> (usize, usize) {
    if len_from == 0 || len_to == 0 {
        return (0, 0);
    }

    let k = len_to as f64 / len_from as f64;
    let start = ((i * n) as f64 * k).floor() as i64;
    let span = (n as f64 * k).floor() as i64;
    let window = window as i64;
    let len_to = len_to as i64;

    let lo = (start - window + shift).clamp(0, len_to);
    let hi = (start + span + window + shift).clamp(0, len_to);

    (lo as usize, hi.max(lo) as usize)
}

/// Proxies are only used when loaded for the whole document
fn proxy_slice(proxy: &[String], start: usize, end: usize) -> Option<Vec<String>> {
    if proxy.is_empty() || end > proxy.len() {
        return None;
    }
    Some(proxy[start..end].to_vec())
}

fn split_lines(lines: &[StoredLine]) -> (Vec<String>, Vec<i64>) {
    lines.iter().map(|line| (line.text.clone(), line.id)).unzip()
}
