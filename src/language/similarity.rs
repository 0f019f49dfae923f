//! Gestalt pattern matching similarity.

/// Similarity in `[0, 1]`: twice the number of matched characters over the
/// total length. Matching recursively takes the longest common block, then
/// matches the pieces on either side of it.
pub fn ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched(&a, &b) as f32 / total as f32
}

fn matched(a: &[char], b: &[char]) -> usize {
    let (i, j, k) = longest_block(a, b);
    if k == 0 {
        return 0;
    }
    k + matched(&a[..i], &b[..j]) + matched(&a[i + k..], &b[j + k..])
}

/// Longest common block as `(start_a, start_b, len)`, earliest in `a` then in `b`.
fn longest_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            let k = cur[j + 1];
            if k > best.2 {
                best = (i + 1 - k, j + 1 - k, k);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_disjoint() {
        assert_eq!(ratio("HELLO", "HELLO"), 1.0);
        assert_eq!(ratio("ABC", "XYZ"), 0.0);
        assert_eq!(ratio("", ""), 1.0);
        assert_eq!(ratio("A", ""), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        assert!((ratio("ABCD", "BCDA") - 0.75).abs() < 1e-6);
        assert!((ratio("HELL", "HELLO") - 8.0 / 9.0).abs() < 1e-6);
        assert!((ratio("HEL", "THE") - 4.0 / 6.0).abs() < 1e-6);
    }
}
