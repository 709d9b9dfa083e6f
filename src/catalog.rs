//! Clause catalogs: TOML files describing one standard and its clauses.
//!
//! ```toml
//! [standard]
//! name = "ISO 45001"
//! version = "2018"
//!
//! [[clauses]]
//! number = "6.1.2"
//! title = "Hazard identification and assessment"
//! description = "Processes for ongoing hazard identification"
//! weight = 5.0
//! ```
//!
//! Parents are not written in the file. Each clause's parent is the longest
//! strict dot-prefix already loaded (`6.1.2` → `6.1` → `6`), so parents must
//! appear before their children.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::error::StoreError;
use crate::models::{Clause, NewClause, NewStandard, Standard};
use crate::store::{DocumentStore, SqliteStore};

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogFile {
    pub standard: CatalogStandard,
    #[serde(default)]
    pub clauses: Vec<CatalogClause>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogStandard {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogClause {
    pub number: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Catalogs bundled with the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCatalog {
    Iso45001,
    Isnetworld,
}

impl SampleCatalog {
    pub const ALL: [SampleCatalog; 2] = [SampleCatalog::Iso45001, SampleCatalog::Isnetworld];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "iso45001" | "iso-45001" => Some(SampleCatalog::Iso45001),
            "isnetworld" => Some(SampleCatalog::Isnetworld),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            SampleCatalog::Iso45001 => "iso45001",
            SampleCatalog::Isnetworld => "isnetworld",
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            SampleCatalog::Iso45001 => include_str!("../catalogs/iso45001.toml"),
            SampleCatalog::Isnetworld => include_str!("../catalogs/isnetworld.toml"),
        }
    }

    pub fn catalog(&self) -> Result<CatalogFile> {
        parse_catalog(self.source())
            .with_context(|| format!("bundled catalog '{}' is malformed", self.key()))
    }
}

pub fn parse_catalog(text: &str) -> Result<CatalogFile> {
    let catalog: CatalogFile = toml::from_str(text).context("Failed to parse catalog")?;
    if catalog.standard.name.trim().is_empty() {
        bail!("catalog standard name is empty");
    }
    Ok(catalog)
}

pub fn read_catalog(path: &Path) -> Result<CatalogFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    parse_catalog(&text)
}

/// Longest strict dot-prefix of `number` present in `loaded`.
fn derive_parent(number: &str, loaded: &HashMap<String, i64>) -> Option<i64> {
    let mut candidate = number;
    while let Some((head, _)) = candidate.rsplit_once('.') {
        if let Some(id) = loaded.get(head) {
            return Some(*id);
        }
        candidate = head;
    }
    None
}

/// A standard and the clauses inserted for it.
#[derive(Debug, Clone)]
pub struct LoadedCatalog {
    pub standard: Standard,
    pub clauses: Vec<Clause>,
}

/// Checks every clause before anything is written: numbers must be
/// non-empty and unique, weights positive and finite.
pub fn validate_catalog(catalog: &CatalogFile) -> Result<(), StoreError> {
    let name = &catalog.standard.name;
    let mut seen = HashSet::new();
    for entry in &catalog.clauses {
        let number = entry.number.trim();
        if number.is_empty() {
            return Err(StoreError::Invalid(format!(
                "clause '{}' in catalog '{}' has no number",
                entry.title, name
            )));
        }
        if !seen.insert(number) {
            return Err(StoreError::Invalid(format!(
                "clause {} appears twice in catalog '{}'",
                number, name
            )));
        }
        if !entry.weight.is_finite() || entry.weight <= 0.0 {
            return Err(StoreError::Invalid(format!(
                "clause {} in catalog '{}' has non-positive weight {}",
                number, name, entry.weight
            )));
        }
    }
    Ok(())
}

/// Validates the whole catalog, then inserts the standard and every clause
/// in file order. A rejected catalog leaves the store untouched.
///
/// A duplicate standard name is a [`StoreError::Conflict`]; a repeated or
/// empty clause number or a non-positive weight is [`StoreError::Invalid`].
pub async fn load_catalog(
    store: &dyn DocumentStore,
    catalog: &CatalogFile,
) -> Result<LoadedCatalog, StoreError> {
    validate_catalog(catalog)?;
    let standard = store
        .insert_standard(&NewStandard {
            name: catalog.standard.name.clone(),
            version: catalog.standard.version.clone(),
            description: catalog.standard.description.clone(),
        })
        .await?;

    let mut loaded: HashMap<String, i64> = HashMap::new();
    let mut clauses = Vec::with_capacity(catalog.clauses.len());
    for entry in &catalog.clauses {
        let number = entry.number.trim();
        let clause = store
            .insert_clause(&NewClause {
                standard_id: standard.id,
                clause_number: number.to_string(),
                title: entry.title.clone(),
                description: entry.description.clone(),
                weight: entry.weight,
                parent_clause_id: derive_parent(number, &loaded),
            })
            .await?;
        loaded.insert(clause.clause_number.clone(), clause.id);
        clauses.push(clause);
    }

    Ok(LoadedCatalog { standard, clauses })
}

/// Looks a standard up by numeric id, then by exact name.
pub async fn find_standard(
    store: &dyn DocumentStore,
    reference: &str,
) -> Result<Option<Standard>, StoreError> {
    if let Ok(id) = reference.trim().parse::<i64>() {
        if let Some(standard) = store.get_standard(id).await? {
            return Ok(Some(standard));
        }
    }
    store.find_standard_by_name(reference.trim()).await
}

/// [`find_standard`], failing with a readable message when nothing matches.
pub async fn resolve_standard(store: &dyn DocumentStore, reference: &str) -> Result<Standard> {
    match find_standard(store, reference).await? {
        Some(standard) => Ok(standard),
        None => bail!(
            "No standard '{}'. Run `clausemap standards` to list loaded standards.",
            reference
        ),
    }
}

pub(crate) async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    Ok(SqliteStore::new(pool))
}

fn print_loaded(loaded: &LoadedCatalog) {
    println!(
        "Loaded standard '{}' (id {}) with {} clauses.",
        loaded.standard.name,
        loaded.standard.id,
        loaded.clauses.len()
    );
}

pub async fn run_catalog_load(config: &Config, path: &Path) -> Result<()> {
    let catalog = read_catalog(path)?;
    let store = open_store(config).await?;
    let loaded = load_catalog(&store, &catalog)
        .await
        .with_context(|| format!("Failed to load catalog {}", path.display()))?;
    print_loaded(&loaded);
    Ok(())
}

pub async fn run_catalog_sample(config: &Config, name: &str) -> Result<()> {
    let Some(sample) = SampleCatalog::parse(name) else {
        let known: Vec<&str> = SampleCatalog::ALL.iter().map(|s| s.key()).collect();
        bail!("Unknown sample catalog '{}'. Available: {}", name, known.join(", "));
    };
    let store = open_store(config).await?;
    let loaded = load_catalog(&store, &sample.catalog()?).await?;
    print_loaded(&loaded);
    Ok(())
}

pub async fn run_catalog_show(config: &Config, reference: &str) -> Result<()> {
    let store = open_store(config).await?;
    let standard = resolve_standard(&store, reference).await?;
    let clauses = store.load_clauses(standard.id).await?;

    match &standard.version {
        Some(version) => println!("{} {} (id {})", standard.name, version, standard.id),
        None => println!("{} (id {})", standard.name, standard.id),
    }
    if let Some(description) = &standard.description {
        println!("{}", description);
    }
    println!();
    for clause in &clauses {
        let depth = clause.clause_number.matches('.').count();
        let indent = "  ".repeat(depth);
        println!(
            "{}{:<8} {}  [id {}, weight {:.1}]",
            indent, clause.clause_number, clause.title, clause.id, clause.weight
        );
    }
    println!();
    println!("{} clauses", clauses.len());
    Ok(())
}

pub async fn run_standards(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let standards = store.list_standards().await?;
    if standards.is_empty() {
        println!("No standards loaded. Try `clausemap catalog sample iso45001`.");
        return Ok(());
    }
    println!("{:<6} {:<24} {:<10} CLAUSES", "ID", "NAME", "VERSION");
    for standard in &standards {
        let count = store.load_clauses(standard.id).await?.len();
        println!(
            "{:<6} {:<24} {:<10} {}",
            standard.id,
            standard.name,
            standard.version.as_deref().unwrap_or("-"),
            count
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn bundled_catalogs_parse() {
        let iso = SampleCatalog::Iso45001.catalog().unwrap();
        assert_eq!(iso.standard.name, "ISO 45001");
        assert_eq!(iso.clauses.len(), 40);
        let isn = SampleCatalog::Isnetworld.catalog().unwrap();
        assert_eq!(isn.clauses.len(), 10);
        assert!(isn.clauses.iter().all(|c| c.weight > 0.0));
    }

    #[test]
    fn parent_is_longest_loaded_prefix() {
        let mut loaded = HashMap::new();
        loaded.insert("6".to_string(), 1);
        loaded.insert("6.1".to_string(), 2);
        assert_eq!(derive_parent("6.1.2", &loaded), Some(2));
        assert_eq!(derive_parent("6.2", &loaded), Some(1));
        // "6.1.2" was never loaded, so 6.1 is the nearest ancestor
        assert_eq!(derive_parent("6.1.2.1", &loaded), Some(2));
        assert_eq!(derive_parent("7", &loaded), None);
        assert_eq!(derive_parent("61.1", &loaded), None);
    }

    #[tokio::test]
    async fn load_builds_clause_tree() {
        let store = InMemoryStore::new();
        let loaded = load_catalog(&store, &SampleCatalog::Iso45001.catalog().unwrap())
            .await
            .unwrap();
        assert_eq!(loaded.clauses.len(), 40);

        let by_number: HashMap<&str, &Clause> = loaded
            .clauses
            .iter()
            .map(|c| (c.clause_number.as_str(), c))
            .collect();
        assert_eq!(by_number["4"].parent_clause_id, None);
        assert_eq!(by_number["6.1.2"].parent_clause_id, Some(by_number["6.1"].id));
        assert_eq!(by_number["10.3"].parent_clause_id, Some(by_number["10"].id));

        let err = load_catalog(&store, &SampleCatalog::Iso45001.catalog().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn repeated_clause_number_is_invalid() {
        let catalog = parse_catalog(
            r#"
            [standard]
            name = "Dupes"

            [[clauses]]
            number = "1"
            title = "One"

            [[clauses]]
            number = "1"
            title = "One again"
            "#,
        )
        .unwrap();
        let err = load_catalog(&InMemoryStore::new(), &catalog)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn rejected_catalog_leaves_nothing_behind() {
        let store = InMemoryStore::new();
        let bad = parse_catalog(
            r#"
            [standard]
            name = "X"

            [[clauses]]
            number = "4"
            title = "Context"

            [[clauses]]
            number = "4"
            title = "Context again"
            "#,
        )
        .unwrap();
        let err = load_catalog(&store, &bad).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(store.list_standards().await.unwrap().is_empty());

        let fixed = parse_catalog(
            r#"
            [standard]
            name = "X"

            [[clauses]]
            number = "4"
            title = "Context"

            [[clauses]]
            number = "4.1"
            title = "Understanding the organization"
            "#,
        )
        .unwrap();
        let loaded = load_catalog(&store, &fixed).await.unwrap();
        assert_eq!(loaded.clauses.len(), 2);
        assert_eq!(loaded.clauses[1].parent_clause_id, Some(loaded.clauses[0].id));
    }

    #[test]
    fn weights_and_numbers_are_checked() {
        let zero_weight = parse_catalog(
            r#"
            [standard]
            name = "W"

            [[clauses]]
            number = "1"
            title = "One"
            weight = 0.0
            "#,
        )
        .unwrap();
        assert!(matches!(validate_catalog(&zero_weight), Err(StoreError::Invalid(_))));

        let blank_number = parse_catalog(
            r#"
            [standard]
            name = "B"

            [[clauses]]
            number = "  "
            title = "Nameless"
            "#,
        )
        .unwrap();
        assert!(matches!(validate_catalog(&blank_number), Err(StoreError::Invalid(_))));

        assert!(validate_catalog(&SampleCatalog::Iso45001.catalog().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn standard_resolves_by_id_or_name() {
        let store = InMemoryStore::new();
        let loaded = load_catalog(&store, &SampleCatalog::Isnetworld.catalog().unwrap())
            .await
            .unwrap();
        let by_id = find_standard(&store, &loaded.standard.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.name, "ISNetworld");
        assert!(find_standard(&store, "ISNetworld").await.unwrap().is_some());
        assert!(find_standard(&store, "SOC 2").await.unwrap().is_none());
    }
}
