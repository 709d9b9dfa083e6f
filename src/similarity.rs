//! Multi-factor similarity scoring between a document and a clause.
//!
//! The composite score is a weighted sum of three independent signals:
//!
//! | Signal | Weight | Inputs |
//! |--------|--------|--------|
//! | Clause number contained in filename | 0.40 | file stem, clause number |
//! | Ratcliff/Obershelp ratio | 0.30 | file stem, clause title |
//! | Keyword Jaccard | 0.30 | document text, clause description |
//!
//! The sum is clamped to `[0, 1]`.

use std::collections::HashSet;

use crate::keywords::extract_keywords;

pub const CONTAINMENT_WEIGHT: f64 = 0.40;
pub const TITLE_WEIGHT: f64 = 0.30;
pub const KEYWORD_WEIGHT: f64 = 0.30;

/// Keywords taken from each side before computing overlap.
pub const KEYWORDS_PER_SIDE: usize = 30;

/// Weighted contributions of each signal to one composite score.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub containment: f64,
    pub title: f64,
    pub keywords: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        (self.containment + self.title + self.keywords).clamp(0.0, 1.0)
    }
}

/// Removes the separators people put inside clause numbers and filenames.
pub fn strip_separators(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '.' | '-' | '_')).collect()
}

/// True when the separator-free clause number occurs in the separator-free filename.
pub fn filename_contains_clause(filename: &str, clause_number: &str) -> bool {
    let needle = strip_separators(clause_number);
    !needle.is_empty() && strip_separators(filename).contains(&needle)
}

/// Ratcliff/Obershelp "gestalt" similarity, case-insensitive, in `[0, 1]`.
///
/// Returns 0 when both strings are empty.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 0.0;
    }
    2.0 * matched_len(&a, &b) as f64 / total as f64
}

/// Sum of the longest-common-substring lengths found by recursing on the
/// unmatched remainders left and right of each match.
fn matched_len(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        total += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    total
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`, as
/// `(start_a, start_b, len)`. Ties go to the earliest block in `a`, then
/// the earliest in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi - blo;
    let mut best = (alo, blo, 0);
    // run[j + 1] = length of the common run ending at (i, blo + j)
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];
    for i in alo..ahi {
        for j in 0..width {
            if a[i] == b[blo + j] {
                let k = prev[j] + 1;
                curr[j + 1] = k;
                if k > best.2 {
                    best = (i + 1 - k, blo + j + 1 - k, k);
                }
            } else {
                curr[j + 1] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    best
}

/// Intersection over union; 0 if either set is empty.
pub fn jaccard<S: AsRef<str>>(left: &[S], right: &[S]) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let left: HashSet<&str> = left.iter().map(AsRef::as_ref).collect();
    let right: HashSet<&str> = right.iter().map(AsRef::as_ref).collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Scores one document against one clause.
///
/// `filename` is the file stem; the extension never contributes signal.
pub fn score_breakdown(
    filename: &str,
    text: &str,
    clause_number: &str,
    clause_title: &str,
    clause_description: &str,
) -> ScoreBreakdown {
    let containment = if filename_contains_clause(filename, clause_number) {
        CONTAINMENT_WEIGHT
    } else {
        0.0
    };

    let title = similarity(filename, clause_title) * TITLE_WEIGHT;

    let keywords = if text.is_empty() || clause_description.is_empty() {
        0.0
    } else {
        let doc_keywords = extract_keywords(text, KEYWORDS_PER_SIDE);
        let clause_keywords = extract_keywords(clause_description, KEYWORDS_PER_SIDE);
        jaccard(&doc_keywords, &clause_keywords) * KEYWORD_WEIGHT
    };

    ScoreBreakdown {
        containment,
        title,
        keywords,
    }
}

/// Composite match score in `[0, 1]`.
pub fn composite_score(
    filename: &str,
    text: &str,
    clause_number: &str,
    clause_title: &str,
    clause_description: &str,
) -> f64 {
    score_breakdown(filename, text, clause_number, clause_title, clause_description).total()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_strings_are_fully_similar() {
        assert!(approx(similarity("Risk Assessment", "Risk Assessment"), 1.0));
        assert!(approx(similarity("a", "a"), 1.0));
    }

    #[test]
    fn empty_strings_score_zero() {
        assert_eq!(similarity("policy", ""), 0.0);
        assert_eq!(similarity("", "policy"), 0.0);
        assert_eq!(similarity("", ""), 0.0);
    }

    #[test]
    fn similarity_ignores_case() {
        assert!(approx(similarity("OHS Policy", "ohs policy"), 1.0));
    }

    #[test]
    fn gestalt_ratio_matches_reference_values() {
        // "abcd" vs "bcde": one block "bcd" -> 2*3/8
        assert!(approx(similarity("abcd", "bcde"), 0.75));
        // blocks "ab" and "d" (recursing on the right remainder) -> 2*3/7
        assert!(approx(similarity("abxd", "abd"), 6.0 / 7.0));
        // "wikim" then "ia" -> 2*7/18
        assert!(approx(similarity("WIKIMEDIA", "WIKIMANIA"), 14.0 / 18.0));
        // "gestalt p" then "r" -> 2*10/31
        assert!(approx(
            similarity("GESTALT PRACTICE", "GESTALT PATTERN"),
            20.0 / 31.0
        ));
    }

    #[test]
    fn longest_match_prefers_leftmost_block() {
        let a: Vec<char> = "xabyab".chars().collect();
        let b: Vec<char> = "ab".chars().collect();
        assert_eq!(longest_match(&a, &b, 0, a.len(), 0, b.len()), (1, 0, 2));
    }

    #[test]
    fn jaccard_bounds() {
        let a = vec!["risk", "hazard"];
        let empty: Vec<&str> = Vec::new();
        assert!(approx(jaccard(&a, &a), 1.0));
        assert_eq!(jaccard(&empty, &a), 0.0);
        assert_eq!(jaccard(&empty, &empty), 0.0);
        assert!(approx(jaccard(&a, &["risk", "audit"]), 1.0 / 3.0));
    }

    #[test]
    fn clause_number_in_filename_contributes_forty_percent() {
        let b = score_breakdown(
            "6.1.2_Risk_Assessment",
            "",
            "6.1.2",
            "Hazard identification and assessment",
            "Processes for ongoing hazard identification",
        );
        assert!(approx(b.containment, 0.40));
        assert!(b.total() >= 0.40);
        assert!(b.total() > 0.3);
    }

    #[test]
    fn unrelated_file_scores_zero() {
        let b = score_breakdown("unrelated_report", "quarterly revenue figures", "5.2", "", "OH&S policy");
        assert_eq!(b.containment, 0.0);
        assert_eq!(b.title, 0.0);
        assert_eq!(b.keywords, 0.0);
        assert_eq!(b.total(), 0.0);
    }

    #[test]
    fn empty_clause_number_never_matches() {
        assert!(!filename_contains_clause("anything", ""));
        assert!(!filename_contains_clause("anything", ".-_"));
    }

    #[test]
    fn composite_is_clamped() {
        let text = "hazard identification risk assessment controls";
        let s = composite_score(
            "612 hazard identification risk assessment controls",
            text,
            "6.1.2",
            "612 hazard identification risk assessment controls",
            text,
        );
        assert!(s <= 1.0);
        assert!(approx(s, 1.0));
    }

    #[test]
    fn composite_stays_in_unit_interval() {
        let cases = [
            ("", "", "", "", ""),
            ("a", "b", "c", "d", "e"),
            ("4.2_Stakeholders", "workers needs expectations", "4.2", "Understanding needs", "needs of workers"),
        ];
        for (f, t, n, ti, d) in cases {
            let s = composite_score(f, t, n, ti, d);
            assert!((0.0..=1.0).contains(&s), "{} out of range", s);
        }
    }
}
