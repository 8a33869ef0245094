//! Lookup of city ids in the provider's `city.list.json` catalogue.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wxsync_core::CityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub id: CityId,
    pub name: String,
    #[serde(default)]
    pub state: String,
    pub country: String,
    #[serde(default)]
    pub coord: Option<Coord>,
}

/// A configured city: either a catalogue id or a name/country pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CitySelector {
    Id(CityId),
    Named { name: String, country: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogueError {
    #[error("city {name:?} ({country}) not found in catalogue")]
    NotFound { name: String, country: String },
    #[error("city {name:?} ({country}) is ambiguous, candidates: {candidates:?}")]
    Ambiguous {
        name: String,
        country: String,
        candidates: Vec<CatalogueEntry>,
    },
    #[error("city {name:?} ({country}) given by name but no catalogue is configured")]
    CatalogueRequired { name: String, country: String },
}

#[derive(Debug, Clone, Default)]
pub struct CityCatalogue {
    entries: Vec<CatalogueEntry>,
}

impl CityCatalogue {
    pub fn new(entries: Vec<CatalogueEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let entries: Vec<CatalogueEntry> =
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose name matches case-insensitively, optionally within one country.
    pub fn search<'a>(
        &'a self,
        name: &'a str,
        country: Option<&'a str>,
    ) -> impl Iterator<Item = &'a CatalogueEntry> + 'a {
        let name = name.trim().to_lowercase();
        self.entries
            .iter()
            .filter(move |e| e.name.to_lowercase() == name)
            .filter(move |e| country.map_or(true, |c| e.country.eq_ignore_ascii_case(c.trim())))
    }

    pub fn resolve_name(&self, name: &str, country: &str) -> Result<CityId, CatalogueError> {
        let mut matches: Vec<&CatalogueEntry> = self.search(name, Some(country)).collect();
        matches.sort_by_key(|e| e.id);
        matches.dedup_by_key(|e| e.id);
        match matches.as_slice() {
            [] => Err(CatalogueError::NotFound {
                name: name.to_string(),
                country: country.to_string(),
            }),
            [only] => Ok(only.id),
            many => Err(CatalogueError::Ambiguous {
                name: name.to_string(),
                country: country.to_string(),
                candidates: many.iter().map(|e| (*e).clone()).collect(),
            }),
        }
    }
}

/// Resolve configured selectors to ids, dropping repeats but keeping order.
pub fn resolve_selectors(
    selectors: &[CitySelector],
    catalogue: Option<&CityCatalogue>,
) -> Result<Vec<CityId>, CatalogueError> {
    let mut ids: Vec<CityId> = Vec::with_capacity(selectors.len());
    for selector in selectors {
        let id = match selector {
            CitySelector::Id(id) => *id,
            CitySelector::Named { name, country } => match catalogue {
                Some(catalogue) => catalogue.resolve_name(name, country)?,
                None => {
                    return Err(CatalogueError::CatalogueRequired {
                        name: name.clone(),
                        country: country.clone(),
                    })
                }
            },
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
