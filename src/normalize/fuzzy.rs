//! Token-set similarity used by the resolver for team and title matching.
//!
//! Tokenizes both sides on non-alphanumerics, then compares the sorted
//! intersection against each sorted full set with a longest-common-
//! subsequence ratio. Word order and duplicate tokens do not matter, so
//! "Man Utd vs Arsenal Winner?" still lines up with "Arsenal v Man Utd".

use std::collections::BTreeSet;

fn tokenize(value: &str) -> BTreeSet<String> {
    value
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// 2*LCS / (len_a + len_b) over characters, the classic sequence ratio.
fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Single-row LCS table.
    let mut prev = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                current[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    let lcs = prev[b.len()] as f64;
    2.0 * lcs / (a.len() + b.len()) as f64
}

fn joined(tokens: &BTreeSet<String>) -> String {
    tokens.iter().cloned().collect::<Vec<_>>().join(" ")
}

/// Similarity in [0, 1]; 0 when either side has no tokens. Symmetric.
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: BTreeSet<String> = tokens_a.intersection(&tokens_b).cloned().collect();

    let sorted_intersection = joined(&intersection);
    let sorted_a = joined(&tokens_a);
    let sorted_b = joined(&tokens_b);

    let r1 = sequence_ratio(&sorted_intersection, &sorted_a);
    let r2 = sequence_ratio(&sorted_intersection, &sorted_b);
    let r3 = sequence_ratio(&sorted_a, &sorted_b);

    r1.max(r2).max(r3)
}
