//! Definitions registry and the static plugin catalogue
//!
//! Facters and validators are selected by name at startup from a fixed
//! catalogue. The definitions they declare are collected into a
//! [`DefinitionRegistry`] before any review runs; every fact or violation
//! emitted at runtime must be found there.

use std::collections::HashMap;

use super::facters::{HtmlFacter, LinksFacter, RequestsFacter};
use super::validators::{
    LinksValidator, MetaValidator, RequestsValidator, TitleValidator, WwwRedirectValidator,
};
use super::{FactDefinition, Facter, Validator, ViolationDefinition};
use crate::utils::error::ReviewError;

/// Facter names known to the catalogue
pub const FACTER_NAMES: &[&str] = &["html", "requests", "links"];

/// Validator names known to the catalogue
pub const VALIDATOR_NAMES: &[&str] = &["title", "meta", "requests", "links", "www_redirect"];

/// Construct a facter by configured name
pub fn facter_by_name(name: &str) -> Result<Box<dyn Facter>, ReviewError> {
    match name {
        "html" => Ok(Box::new(HtmlFacter)),
        "requests" => Ok(Box::new(RequestsFacter)),
        "links" => Ok(Box::new(LinksFacter)),
        other => Err(ReviewError::UnknownPlugin {
            kind: "facter",
            name: other.to_string(),
        }),
    }
}

/// Construct a validator by configured name
pub fn validator_by_name(name: &str) -> Result<Box<dyn Validator>, ReviewError> {
    match name {
        "title" => Ok(Box::new(TitleValidator)),
        "meta" => Ok(Box::new(MetaValidator)),
        "requests" => Ok(Box::new(RequestsValidator)),
        "links" => Ok(Box::new(LinksValidator)),
        "www_redirect" => Ok(Box::new(WwwRedirectValidator)),
        other => Err(ReviewError::UnknownPlugin {
            kind: "validator",
            name: other.to_string(),
        }),
    }
}

/// Construct facters in the given order
pub fn facters_by_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<Box<dyn Facter>>, ReviewError> {
    names.iter().map(|n| facter_by_name(n.as_ref())).collect()
}

/// Construct validators in the given order
pub fn validators_by_names<S: AsRef<str>>(
    names: &[S],
) -> Result<Vec<Box<dyn Validator>>, ReviewError> {
    names.iter().map(|n| validator_by_name(n.as_ref())).collect()
}

/// A definition together with the plugin that owns it
#[derive(Debug, Clone)]
pub struct Registered<D> {
    pub owner: &'static str,
    pub definition: D,
}

/// Static fact and violation metadata contributed by installed plugins
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    facts: HashMap<&'static str, Registered<FactDefinition>>,
    violations: HashMap<&'static str, Registered<ViolationDefinition>>,
}

impl DefinitionRegistry {
    /// Collect definitions from the given plugins
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::DuplicateDefinition` when two plugins, or one
    /// plugin twice, declare the same key.
    pub fn build(
        facters: &[Box<dyn Facter>],
        validators: &[Box<dyn Validator>],
    ) -> Result<Self, ReviewError> {
        let mut registry = Self::default();

        for facter in facters {
            for definition in facter.definitions() {
                let key = definition.key;
                let entry = Registered {
                    owner: facter.name(),
                    definition,
                };
                if registry.facts.insert(key, entry).is_some() {
                    return Err(ReviewError::DuplicateDefinition {
                        kind: "fact",
                        key: key.to_string(),
                    });
                }
            }
        }

        for validator in validators {
            for definition in validator.definitions() {
                let key = definition.key;
                let entry = Registered {
                    owner: validator.name(),
                    definition,
                };
                if registry.violations.insert(key, entry).is_some() {
                    return Err(ReviewError::DuplicateDefinition {
                        kind: "violation",
                        key: key.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            facts = registry.facts.len(),
            violations = registry.violations.len(),
            "Definitions registry built"
        );

        Ok(registry)
    }

    /// Registry of every plugin in the catalogue
    pub fn installed() -> Result<Self, ReviewError> {
        let facters = facters_by_names(FACTER_NAMES)?;
        let validators = validators_by_names(VALIDATOR_NAMES)?;
        Self::build(&facters, &validators)
    }

    pub fn fact(&self, key: &str) -> Option<&FactDefinition> {
        self.facts.get(key).map(|r| &r.definition)
    }

    pub fn violation(&self, key: &str) -> Option<&ViolationDefinition> {
        self.violations.get(key).map(|r| &r.definition)
    }

    /// Plugin that declared a fact key
    pub fn fact_owner(&self, key: &str) -> Option<&'static str> {
        self.facts.get(key).map(|r| r.owner)
    }

    /// Plugin that declared a violation key
    pub fn violation_owner(&self, key: &str) -> Option<&'static str> {
        self.violations.get(key).map(|r| r.owner)
    }

    /// Fact definitions sorted by key
    pub fn fact_definitions(&self) -> Vec<&Registered<FactDefinition>> {
        let mut all: Vec<_> = self.facts.values().collect();
        all.sort_by_key(|r| r.definition.key);
        all
    }

    /// Violation definitions sorted by key
    pub fn violation_definitions(&self) -> Vec<&Registered<ViolationDefinition>> {
        let mut all: Vec<_> = self.violations.values().collect();
        all.sort_by_key(|r| r.definition.key);
        all
    }
}
