//! Weighted compliance score for a standard.
//!
//! A clause is covered when at least one *active* document is assigned to
//! it. Scores are the covered share of total clause weight, as a percentage
//! rounded to two decimals, overall and per element (the first segment of
//! the clause number).

use anyhow::Result;
use serde::Serialize;

use crate::catalog::{open_store, resolve_standard};
use crate::config::Config;
use crate::models::{compare_clause_numbers, ClauseCoverage};
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingClause {
    pub clause_number: String,
    pub title: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementScore {
    pub element: String,
    pub total_clauses: usize,
    pub compliant_clauses: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub standard_id: i64,
    pub overall_score: f64,
    pub total_clauses: usize,
    pub compliant_clauses: usize,
    pub missing: Vec<MissingClause>,
    pub elements: Vec<ElementScore>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percentage(covered: f64, total: f64) -> f64 {
    if total > 0.0 {
        round2(covered / total * 100.0)
    } else {
        0.0
    }
}

#[derive(Default)]
struct Tally {
    clauses: usize,
    covered: usize,
    weight: f64,
    covered_weight: f64,
}

impl Tally {
    fn add(&mut self, weight: f64, covered: bool) {
        self.clauses += 1;
        self.weight += weight;
        if covered {
            self.covered += 1;
            self.covered_weight += weight;
        }
    }
}

pub fn compute_compliance(standard_id: i64, coverage: &[ClauseCoverage]) -> ComplianceReport {
    let mut overall = Tally::default();
    let mut elements: Vec<(String, Tally)> = Vec::new();
    let mut missing = Vec::new();

    for entry in coverage {
        let clause = &entry.clause;
        let covered = entry.active_documents > 0;
        overall.add(clause.weight, covered);

        let element = clause
            .clause_number
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        match elements.iter_mut().find(|(name, _)| *name == element) {
            Some((_, tally)) => tally.add(clause.weight, covered),
            None => {
                let mut tally = Tally::default();
                tally.add(clause.weight, covered);
                elements.push((element, tally));
            }
        }

        if !covered {
            missing.push(MissingClause {
                clause_number: clause.clause_number.clone(),
                title: clause.title.clone(),
                weight: clause.weight,
            });
        }
    }

    elements.sort_by(|a, b| compare_clause_numbers(&a.0, &b.0));
    missing.sort_by(|a, b| compare_clause_numbers(&a.clause_number, &b.clause_number));

    ComplianceReport {
        standard_id,
        overall_score: percentage(overall.covered_weight, overall.weight),
        total_clauses: overall.clauses,
        compliant_clauses: overall.covered,
        missing,
        elements: elements
            .into_iter()
            .map(|(element, tally)| ElementScore {
                element,
                total_clauses: tally.clauses,
                compliant_clauses: tally.covered,
                score: percentage(tally.covered_weight, tally.weight),
            })
            .collect(),
    }
}

pub async fn run_score(config: &Config, reference: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let standard = resolve_standard(&store, reference).await?;
    let coverage = store.clause_coverage(standard.id).await?;
    let report = compute_compliance(standard.id, &coverage);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} compliance", standard.name);
    println!();
    println!("  overall:    {:.2}%", report.overall_score);
    println!(
        "  clauses:    {} / {} covered",
        report.compliant_clauses, report.total_clauses
    );
    println!();
    println!("  {:<8} {:>8} {:>9}", "ELEMENT", "SCORE", "COVERED");
    for element in &report.elements {
        println!(
            "  {:<8} {:>7.2}% {:>5} / {}",
            element.element, element.score, element.compliant_clauses, element.total_clauses
        );
    }

    if !report.missing.is_empty() {
        println!();
        println!("Missing documents ({}):", report.missing.len());
        for clause in &report.missing {
            println!(
                "  {:<8} {}  (weight {:.1})",
                clause.clause_number, clause.title, clause.weight
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Clause;

    fn entry(number: &str, weight: f64, docs: i64) -> ClauseCoverage {
        ClauseCoverage {
            clause: Clause {
                id: 0,
                standard_id: 1,
                clause_number: number.to_string(),
                title: format!("Clause {}", number),
                description: String::new(),
                weight,
                parent_clause_id: None,
            },
            active_documents: docs,
        }
    }

    #[test]
    fn weighted_scores_round_to_two_places() {
        let coverage = vec![
            entry("4", 2.0, 1),
            entry("4.1", 1.0, 0),
            entry("5", 3.0, 2),
            entry("10", 1.0, 0),
        ];
        let report = compute_compliance(1, &coverage);
        // 5 of 7 weight covered
        assert_eq!(report.overall_score, 71.43);
        assert_eq!(report.total_clauses, 4);
        assert_eq!(report.compliant_clauses, 2);

        let elements: Vec<(&str, f64)> = report
            .elements
            .iter()
            .map(|e| (e.element.as_str(), e.score))
            .collect();
        assert_eq!(elements, vec![("4", 66.67), ("5", 100.0), ("10", 0.0)]);

        let missing: Vec<&str> = report
            .missing
            .iter()
            .map(|m| m.clause_number.as_str())
            .collect();
        assert_eq!(missing, vec!["4.1", "10"]);
    }

    #[test]
    fn empty_standard_scores_zero() {
        let report = compute_compliance(1, &[]);
        assert_eq!(report.overall_score, 0.0);
        assert!(report.elements.is_empty());
    }
}
