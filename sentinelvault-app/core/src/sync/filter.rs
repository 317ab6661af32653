use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;
use crate::storage::{Category, Credential};

/// Category selector for the credential list; `All` disables the filter.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryFilter {
    #[default]
    All,
    #[serde(untagged)]
    Only(Category),
}

impl CategoryFilter {
    pub fn matches(&self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(wanted) => *wanted == category,
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(CategoryFilter::All)
        } else {
            s.parse().map(CategoryFilter::Only)
        }
    }
}

/// Credentials whose site, username or category contains `term`
/// (case-insensitive) and whose category passes `category`.
///
/// Order is preserved and the input is not touched. An empty term matches
/// everything.
pub fn filter<'a>(cache: &'a [Credential], term: &str, category: CategoryFilter) -> Vec<&'a Credential> {
    let needle = term.to_lowercase();
    cache
        .iter()
        .filter(|c| {
            c.site.to_lowercase().contains(&needle)
                || c.username.to_lowercase().contains(&needle)
                || c.category.as_str().contains(&needle)
        })
        .filter(|c| category.matches(c.category))
        .collect()
}

/// In-memory search state of the credential list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFilter {
    pub search_term: String,
    pub category: CategoryFilter,
}

impl ViewFilter {
    pub fn apply<'a>(&self, cache: &'a [Credential]) -> Vec<&'a Credential> {
        filter(cache, &self.search_term, self.category)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_clear(&self) -> bool {
        self.search_term.is_empty() && self.category == CategoryFilter::All
    }
}
