//! Product classification by file name.
//!
//! An ordered list of regex rules maps a granule file name to its product
//! kind. The first rule whose pattern matches decides; later rules are not
//! consulted even if the first one ends up rejecting the name.
//!
//! Rules that join files by acquisition time capture the time token with a
//! `(?P<token>...)` group. A rule's kind may be a template over its captures
//! (`mod$family`), which is expanded and lower-cased per match.

use crate::error::ClassifierError;
use granary_db::ProductKind;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Name of the capture group holding the acquisition time token.
pub const TOKEN_GROUP: &str = "token";

/// How a product participates in scene grouping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleRole {
    /// Defines the scene; its metadata becomes the scene key.
    Anchor,
    /// Sits next to the anchor and shares its time token.
    Companion,
    /// Any other product of the scene.
    #[default]
    Auxiliary,
}

/// Declarative rule as written in config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Product kind, or a capture template such as `mod$family`
    pub kind: String,
    /// Regex over the file name
    pub pattern: String,
    #[serde(default)]
    pub role: RuleRole,
}

impl RuleConfig {
    pub fn new(kind: &str, pattern: &str, role: RuleRole) -> Self {
        Self {
            kind: kind.to_string(),
            pattern: pattern.to_string(),
            role,
        }
    }
}

/// MODIS swath products (Terra `MOD`, Aqua `MYD`).
///
/// MOD03 geolocation anchors the scene, the three MOD02 radiance resolutions
/// share its time token, and the remaining level-2 products are auxiliary.
pub fn default_rules() -> Vec<RuleConfig> {
    let token = |product: &str| format!(r"^M[OY]D{}\.A.{{7}}\.(?P<token>.{{4}}).*hdf$", product);
    let aux = |product: &str| format!(r"^M[OY]D{}.*hdf$", product);

    vec![
        RuleConfig::new("mod03", &token("03"), RuleRole::Anchor),
        RuleConfig::new("mod021km", &token("021KM"), RuleRole::Companion),
        RuleConfig::new("mod02hkm", &token("02HKM"), RuleRole::Companion),
        RuleConfig::new("mod02qkm", &token("02QKM"), RuleRole::Companion),
        RuleConfig::new("mod04", &aux("04"), RuleRole::Auxiliary),
        RuleConfig::new("mod05", &aux("05"), RuleRole::Auxiliary),
        RuleConfig::new("mod07", &aux("07"), RuleRole::Auxiliary),
        RuleConfig::new("mod09", &aux("09"), RuleRole::Auxiliary),
        RuleConfig::new("mod10", &aux("10_L2"), RuleRole::Auxiliary),
        RuleConfig::new("mod14", &aux("14"), RuleRole::Auxiliary),
        RuleConfig::new("mod35", &aux("35"), RuleRole::Auxiliary),
        RuleConfig::new("modhkmds", &aux("HKMDS"), RuleRole::Auxiliary),
        RuleConfig::new("mod1kmds", &aux("1KMDS"), RuleRole::Auxiliary),
    ]
}

/// Result of classifying one file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ProductKind,
    pub role: RuleRole,
    /// Acquisition time token, when the rule captures one
    pub token: Option<String>,
}

#[derive(Debug)]
enum KindSpec {
    Fixed(ProductKind),
    Template(String),
}

/// Compiled rule
#[derive(Debug)]
struct CompiledRule {
    kind: KindSpec,
    pattern: Regex,
    role: RuleRole,
}

impl CompiledRule {
    fn compile(config: &RuleConfig) -> Result<Self, ClassifierError> {
        let pattern = Regex::new(&config.pattern).map_err(|source| ClassifierError::Pattern {
            kind: config.kind.clone(),
            source,
        })?;

        let has_token = pattern
            .capture_names()
            .any(|name| name == Some(TOKEN_GROUP));
        if matches!(config.role, RuleRole::Anchor | RuleRole::Companion) && !has_token {
            return Err(ClassifierError::MissingToken {
                kind: config.kind.clone(),
            });
        }

        let kind = if config.kind.contains('$') {
            KindSpec::Template(config.kind.clone())
        } else {
            KindSpec::Fixed(ProductKind::new(config.kind.clone())?)
        };

        Ok(Self {
            kind,
            pattern,
            role: config.role,
        })
    }

    fn kind_for(&self, caps: &Captures<'_>) -> Option<ProductKind> {
        match &self.kind {
            KindSpec::Fixed(kind) => Some(kind.clone()),
            KindSpec::Template(template) => {
                let mut expanded = String::new();
                caps.expand(template, &mut expanded);
                match ProductKind::new(expanded.to_lowercase()) {
                    Ok(kind) => Some(kind),
                    Err(e) => {
                        debug!(
                            template = %template,
                            error = %e,
                            "Rule produced an unusable product kind"
                        );
                        None
                    }
                }
            }
        }
    }
}

/// Maps file names to product kinds.
#[derive(Debug)]
pub struct Classifier {
    rules: Vec<CompiledRule>,
    known_products: BTreeSet<ProductKind>,
}

impl Classifier {
    /// Compile rules in priority order. A non-empty `known_products`
    /// restricts results to that allow-list.
    pub fn new(
        rules: &[RuleConfig],
        known_products: &[ProductKind],
    ) -> Result<Self, ClassifierError> {
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            known_products: known_products.iter().cloned().collect(),
        })
    }

    /// The built-in MODIS rule set.
    pub fn with_default_rules() -> Result<Self, ClassifierError> {
        Self::new(&default_rules(), &[])
    }

    /// Classify a bare file name (no directory part).
    pub fn classify(&self, file_name: &str) -> Option<Classification> {
        let (rule, caps) = self
            .rules
            .iter()
            .find_map(|rule| rule.pattern.captures(file_name).map(|caps| (rule, caps)))?;

        let kind = rule.kind_for(&caps)?;
        if !self.known_products.is_empty() && !self.known_products.contains(&kind) {
            debug!(file = file_name, kind = %kind, "Skipping unknown product");
            return None;
        }

        Some(Classification {
            kind,
            role: rule.role,
            token: caps.name(TOKEN_GROUP).map(|m| m.as_str().to_string()),
        })
    }

    /// Kind of the first anchor rule with a fixed kind name.
    pub fn anchor_kind(&self) -> Option<&ProductKind> {
        self.rules
            .iter()
            .filter(|rule| rule.role == RuleRole::Anchor)
            .find_map(|rule| match &rule.kind {
                KindSpec::Fixed(kind) => Some(kind),
                KindSpec::Template(_) => None,
            })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
