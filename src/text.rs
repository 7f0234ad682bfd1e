//! Transcript/reference similarity metrics.
//!
//! Two independent local metrics back the accuracy and phonetic scores: a
//! Levenshtein similarity over normalized text, and the same similarity over
//! rule-based phonetic codes so close-but-misspelled transcripts still score.

use once_cell::sync::Lazy;
use regex::Regex;

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[.,!?;:'"]"#).unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase, strip punctuation, collapse whitespace runs, trim. Total:
/// every input maps to some output, empty included.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    collapsed.trim().to_string()
}

/// Rule-based phonetic code for a string.
///
/// Left-to-right scan over the normalized text with one character of
/// lookahead. Digraphs (ch/sh/th) consume two characters; `c` softens to `S`
/// before i/e/y; vowels contribute only in first position. Deterministic,
/// no locale dependence.
pub fn phonetic_code(text: &str) -> String {
    let normalized = normalize(text);
    let chars: Vec<char> = normalized.chars().collect();
    let mut code = String::with_capacity(chars.len());

    let mut i = 0;
    while i < chars.len() {
        let next = chars.get(i + 1).copied();
        match chars[i] {
            'a' | 'e' | 'i' | 'o' | 'u' => {
                if i == 0 {
                    code.push('A');
                }
            }
            'b' => code.push('B'),
            'c' => match next {
                Some('h') => {
                    code.push_str("CH");
                    i += 1;
                }
                Some('i') | Some('e') | Some('y') => code.push('S'),
                _ => code.push('K'),
            },
            'd' => code.push('D'),
            'f' => code.push('F'),
            'g' => code.push('G'),
            'h' => code.push('H'),
            'j' => code.push('J'),
            'k' => code.push('K'),
            'l' => code.push('L'),
            'm' => code.push('M'),
            'n' => code.push('N'),
            'p' => code.push('P'),
            'q' => code.push('K'),
            'r' => code.push('R'),
            's' => {
                if next == Some('h') {
                    code.push_str("SH");
                    i += 1;
                } else {
                    code.push('S');
                }
            }
            't' => {
                if next == Some('h') {
                    code.push_str("TH");
                    i += 1;
                } else {
                    code.push('T');
                }
            }
            'v' => code.push('V'),
            'w' => code.push('W'),
            'x' => code.push_str("KS"),
            'y' => code.push('Y'),
            'z' => code.push('Z'),
            _ => {}
        }
        i += 1;
    }

    code
}

/// Edit-distance similarity between two strings on a 0-100 scale.
///
/// Both inputs are normalized first. Strings equal after normalization score
/// 100 (this covers two empty strings); one empty and one not score 0.
pub fn similarity(a: &str, b: &str) -> u8 {
    let s1 = normalize(a);
    let s2 = normalize(b);

    if s1 == s2 {
        return 100;
    }
    if s1.is_empty() || s2.is_empty() {
        return 0;
    }

    let c1: Vec<char> = s1.chars().collect();
    let c2: Vec<char> = s2.chars().collect();
    let distance = levenshtein(&c1, &c2);
    let max_len = c1.len().max(c2.len());

    let score = ((1.0 - distance as f64 / max_len as f64) * 100.0).round();
    score.clamp(0.0, 100.0) as u8
}

/// Similarity of the phonetic codes of two strings.
pub fn phonetic_similarity(a: &str, b: &str) -> u8 {
    similarity(&phonetic_code(a), &phonetic_code(b))
}

/// Levenshtein distance with unit insert/delete/substitute costs, two-row DP.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(curr[j] + 1).min(prev[j + 1] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
