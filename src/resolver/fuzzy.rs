/*!
 * Fuzzy company-name matching.
 *
 * Normalized Levenshtein similarity over already-normalized names.
 */

/// Similarity between two normalized names (0.0-1.0)
pub fn similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let distance = levenshtein_distance(a, b);
    let max_len = a.chars().count().max(b.chars().count());

    1.0 - (distance as f32 / max_len as f32)
}

/// Levenshtein distance in chars
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    // Two rows are enough
    let mut prev_row: Vec<usize> = (0..=b_len).collect();
    let mut curr_row: Vec<usize> = vec![0; b_len + 1];

    for i in 1..=a_len {
        curr_row[0] = i;

        for j in 1..=b_len {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);

            curr_row[j] = (prev_row[j] + 1)
                .min(curr_row[j - 1] + 1)
                .min(prev_row[j - 1] + cost);
        }

        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshteinDistance_shouldCountEdits() {
        assert_eq!(levenshtein_distance("acme", "acme"), 0);
        assert_eq!(levenshtein_distance("acme", "acne"), 1);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_similarity_shouldUseCharLength() {
        assert!((similarity("muller", "müller") - (1.0 - 1.0 / 6.0)).abs() < 1e-6);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("acme", ""), 0.0);
    }

    #[test]
    fn test_similarity_typo_shouldStayAboveDefaultThreshold() {
        assert!(similarity("tema autos", "tema auto") >= 0.85);
        assert!(similarity("acme trading", "globex shipping") < 0.5);
    }
}
