//! Clause matching: score one document against every clause of a standard.

use std::path::Path;

use crate::config::MatchingConfig;
use crate::models::{Clause, ClauseMatch};
use crate::similarity::{filename_contains_clause, score_breakdown, similarity, ScoreBreakdown};

/// Title similarity above this is cited in the match reason.
const TITLE_REASON_THRESHOLD: f64 = 0.5;

/// A clause that passed threshold, with the per-signal contributions.
#[derive(Debug, Clone)]
pub struct ScoredClause {
    pub clause_id: i64,
    pub clause_number: String,
    pub breakdown: ScoreBreakdown,
    pub reason: String,
}

impl ScoredClause {
    pub fn score(&self) -> f64 {
        self.breakdown.total()
    }

    pub fn into_match(self) -> ClauseMatch {
        ClauseMatch {
            clause_id: self.clause_id,
            score: self.breakdown.total(),
            clause_number: self.clause_number,
            reason: self.reason,
        }
    }
}

/// File name without its extension, the form scored against clauses.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Scores `text` (extracted from a file whose stem is `stem`) against every
/// clause and keeps those at or above `config.threshold`, best first.
/// A zero total never matches, even at a zero threshold.
///
/// Equal scores keep clause order. The caller truncates to
/// `max_matches_per_doc`.
pub fn score_clauses(
    stem: &str,
    text: &str,
    clauses: &[Clause],
    config: &MatchingConfig,
) -> Vec<ScoredClause> {
    let mut scored: Vec<ScoredClause> = clauses
        .iter()
        .filter_map(|clause| {
            let breakdown = score_breakdown(
                stem,
                text,
                &clause.clause_number,
                &clause.title,
                &clause.description,
            );
            let total = breakdown.total();
            if total <= 0.0 || total < config.threshold {
                return None;
            }
            Some(ScoredClause {
                clause_id: clause.id,
                clause_number: clause.clause_number.clone(),
                reason: match_reason(breakdown.total(), stem, clause),
                breakdown,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score().total_cmp(&a.score()));
    scored
}

/// Matches a document against `clauses`, truncated to
/// `config.max_matches_per_doc`.
pub fn match_document(
    stem: &str,
    text: &str,
    clauses: &[Clause],
    config: &MatchingConfig,
) -> Vec<ClauseMatch> {
    score_clauses(stem, text, clauses, config)
        .into_iter()
        .take(config.max_matches_per_doc)
        .map(ScoredClause::into_match)
        .collect()
}

/// Human-readable explanation of which signals produced a match.
pub fn match_reason(score: f64, stem: &str, clause: &Clause) -> String {
    let mut reasons = Vec::new();
    if filename_contains_clause(stem, &clause.clause_number) {
        reasons.push(format!("contains clause number '{}'", clause.clause_number));
    }
    let title = similarity(stem, &clause.title);
    if title > TITLE_REASON_THRESHOLD {
        reasons.push(format!(
            "filename similar to clause title ({}% match)",
            (title * 100.0) as i64
        ));
    }
    if reasons.is_empty() {
        format!(
            "Content keywords match clause description ({}% confidence)",
            (score * 100.0) as i64
        )
    } else {
        format!("Matched because filename {}", reasons.join(" and "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(id: i64, number: &str, title: &str, description: &str) -> Clause {
        Clause {
            id,
            standard_id: 1,
            clause_number: number.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            weight: 1.0,
            parent_clause_id: None,
        }
    }

    fn catalog() -> Vec<Clause> {
        vec![
            clause(1, "5.2", "OH&S policy", "Establishing, implementing and maintaining policy"),
            clause(
                2,
                "6.1.2",
                "Hazard identification and assessment",
                "Processes for ongoing hazard identification",
            ),
            clause(3, "9.2", "Internal audit", "Conducting internal audits"),
        ]
    }

    #[test]
    fn clause_number_in_filename_matches_at_default_threshold() {
        let config = MatchingConfig::default();
        let matches = match_document("6.1.2_Risk_Assessment", "", &catalog(), &config);
        assert_eq!(matches[0].clause_id, 2);
        assert!(matches[0].score >= 0.40);
        assert!(matches[0]
            .reason
            .starts_with("Matched because filename contains clause number '6.1.2'"));
    }

    #[test]
    fn unrelated_document_matches_nothing() {
        let config = MatchingConfig {
            threshold: 0.0,
            max_matches_per_doc: 3,
        };
        let clauses = vec![clause(1, "5.2", "", "OH&S policy statement")];
        let matches = match_document("unrelated_report", "quarterly revenue figures", &clauses, &config);
        assert!(matches.is_empty());

        let strict = MatchingConfig::default();
        assert!(match_document("unrelated_report", "quarterly revenue figures", &clauses, &strict)
            .is_empty());
    }

    #[test]
    fn results_are_sorted_and_truncated() {
        let config = MatchingConfig {
            threshold: 0.0,
            max_matches_per_doc: 2,
        };
        let matches = match_document(
            "9.2 internal audit schedule",
            "internal audits conducting",
            &catalog(),
            &config,
        );
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].clause_id, 3);
        assert!(matches[0].score >= matches[1].score);
    }

    #[test]
    fn ties_keep_clause_order() {
        let config = MatchingConfig {
            threshold: 0.0,
            max_matches_per_doc: 10,
        };
        let clauses = vec![
            clause(7, "1", "same", "x"),
            clause(3, "2", "same", "x"),
            clause(5, "3", "same", "x"),
        ];
        let ids: Vec<i64> = match_document("same", "", &clauses, &config)
            .iter()
            .map(|m| m.clause_id)
            .collect();
        assert_eq!(ids, vec![7, 3, 5]);
    }

    #[test]
    fn keyword_only_reason_cites_confidence() {
        let c = clause(1, "9.2", "Internal audit", "audit schedule findings");
        assert_eq!(
            match_reason(0.345, "quarterly_plan", &c),
            "Content keywords match clause description (34% confidence)"
        );
    }

    #[test]
    fn title_reason_cites_similarity() {
        let c = clause(1, "9.2", "Internal audit", "");
        let reason = match_reason(0.3, "Internal audit", &c);
        assert_eq!(reason, "Matched because filename similar to clause title (100% match)");
    }

    #[test]
    fn stem_drops_extension() {
        assert_eq!(file_stem(Path::new("/a/6.1.2_Risk.xlsx")), "6.1.2_Risk");
    }
}
