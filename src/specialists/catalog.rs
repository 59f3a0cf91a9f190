//! Sample-triangle catalog.

use serde::Serialize;

use crate::error::{DispatchError, DispatchResult};

/// Sample datasets offered by default. The first one is the default selection.
pub const DEFAULT_DATASETS: &[&str] = &[
    "clrd",
    "genins",
    "raa",
    "abc",
    "ukmotor",
    "qtr",
    "quarterly",
    "auto",
    "liab",
    "wkcomp",
    "prism",
];

/// Non-empty, ordered list of dataset identifiers users may select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetCatalog {
    names: Vec<String>,
}

impl Default for DatasetCatalog {
    fn default() -> Self {
        Self {
            names: DEFAULT_DATASETS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DatasetCatalog {
    pub fn new(names: Vec<String>) -> DispatchResult<Self> {
        if names.is_empty() {
            return Err(DispatchError::Config(
                "dataset catalog must not be empty".to_string(),
            ));
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn default_name(&self) -> &str {
        &self.names[0]
    }

    /// The requested dataset if it is known, otherwise the default.
    pub fn sanitize(&self, requested: Option<&str>) -> String {
        let requested = requested.map(str::trim).unwrap_or_default();
        if requested.is_empty() {
            log::debug!("No triangle selected, using default '{}'", self.default_name());
            return self.default_name().to_string();
        }
        if !self.contains(requested) {
            log::debug!(
                "Triangle '{}' not in catalog, using default '{}'",
                requested,
                self.default_name()
            );
            return self.default_name().to_string();
        }
        requested.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        let catalog = DatasetCatalog::default();
        assert_eq!(catalog.sanitize(Some("raa")), "raa");
        assert_eq!(catalog.sanitize(Some("  genins ")), "genins");
        assert_eq!(catalog.sanitize(Some("")), "clrd");
        assert_eq!(catalog.sanitize(Some("nonsense")), "clrd");
        assert_eq!(catalog.sanitize(None), "clrd");
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let err = DatasetCatalog::new(vec![]).unwrap_err();
        assert_eq!(err.kind(), "config");
        let catalog = DatasetCatalog::new(vec!["raa".into()]).unwrap();
        assert_eq!(catalog.default_name(), "raa");
    }
}
