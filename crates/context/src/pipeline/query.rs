//! Query refinement between stages

use drugvista_common::models::{Stage, StageResult};

/// Derives retrieval sub-queries for the next stage from a completed stage
pub trait QueryStrategy: Send + Sync {
    /// Sub-queries to retrieve for `next`; empty means no extra retrieval
    fn refine(&self, query: &str, completed: &StageResult, next: Stage) -> Vec<String>;
}

/// Never refines; every stage sees only the evidence for the raw query
pub struct NoRefinement;

impl QueryStrategy for NoRefinement {
    fn refine(&self, _query: &str, _completed: &StageResult, _next: Stage) -> Vec<String> {
        Vec::new()
    }
}

/// Combines the query with the next stage's focus terms and the key fields
/// of the stage just completed.
pub struct FieldQueryStrategy {
    max_queries: usize,
}

impl Default for FieldQueryStrategy {
    fn default() -> Self {
        Self { max_queries: 3 }
    }
}

impl FieldQueryStrategy {
    pub fn new(max_queries: usize) -> Self {
        Self { max_queries }
    }

    fn focus(stage: Stage) -> &'static str {
        match stage {
            Stage::Context => "overview",
            Stage::Clinical => "clinical trial efficacy safety",
            Stage::Market => "market demand competition sales",
            Stage::Decision => "approval risk outlook",
        }
    }

    /// Terms from the completed stage worth searching on
    fn key_terms(completed: &StageResult) -> Vec<String> {
        match completed.stage {
            Stage::Context => completed.list("entities").map(<[String]>::to_vec).unwrap_or_default(),
            Stage::Clinical => {
                let mut terms = Vec::new();
                if let Some(viability) = completed.text("viability") {
                    terms.push(format!("{} clinical viability", viability));
                }
                terms.extend(completed.list("risks").unwrap_or_default().iter().cloned());
                terms
            }
            Stage::Market => {
                let mut terms = Vec::new();
                if let Some(signal) = completed.text("signal") {
                    terms.push(format!("{} market signal", signal));
                }
                terms.extend(completed.list("risks").unwrap_or_default().iter().cloned());
                terms
            }
            Stage::Decision => Vec::new(),
        }
    }
}

impl QueryStrategy for FieldQueryStrategy {
    fn refine(&self, query: &str, completed: &StageResult, next: Stage) -> Vec<String> {
        let focus = Self::focus(next);
        let mut queries = vec![format!("{} {}", query.trim(), focus)];

        for term in Self::key_terms(completed) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let candidate = format!("{} {}", term, focus);
            if !queries.contains(&candidate) {
                queries.push(candidate);
            }
        }

        queries.truncate(self.max_queries);
        queries
    }
}
