//! Format registry - picks the mapping for a decoded table
//!
//! Resolution order:
//! 1. a caller hint (an explicit mapping, or a format id looked up in the
//!    built-in table and then the saved format store)
//! 2. the best built-in detector, auto-applied at or above the auto-apply
//!    threshold, offered for review between the partial and auto-apply
//!    thresholds
//! 3. column inference
//!
//! A known mapping whose columns are not all present in the table is never
//! applied; resolution falls through to inference instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ImportSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{ColumnHint, ColumnRole, FormatMapping};
use crate::ports::SavedFormatStore;
use crate::services::detectors::{builtin_detector, builtin_detectors, FormatDetector};
use crate::services::inference::ColumnInference;
use crate::services::tabular::Table;

/// What the caller already knows about the file's format
#[derive(Debug, Clone, PartialEq)]
pub enum FormatHint {
    /// Use this mapping as-is
    Explicit(FormatMapping),
    /// Use the built-in or saved format with this id
    FormatId(String),
}

/// How trustworthy the resolved mapping is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    /// Supplied by the caller
    Provided,
    /// A detector matched with high confidence
    AutoApplied,
    /// A detector matched weakly; the mapping needs review
    Partial,
    /// Every required role was inferred from content
    Inferred,
    /// Required roles are still unresolved
    Incomplete,
}

/// Where the mapping came from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum MappingOrigin {
    Explicit,
    Builtin { id: String, name: String },
    Saved { id: String },
    Detected { id: String, name: String, score: f64 },
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorScore {
    pub id: String,
    pub name: String,
    pub score: f64,
}

/// Outcome of format resolution for one table
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub mapping: FormatMapping,
    pub origin: MappingOrigin,
    pub tier: ResolutionTier,
    /// Fraction of required roles resolved
    pub completeness: f64,
    /// Confidence per resolved role, keyed by role name
    pub role_confidence: BTreeMap<String, f64>,
    /// One hint per column, in column order
    pub column_hints: Vec<ColumnHint>,
    /// Every detector's score, best first
    pub detector_scores: Vec<DetectorScore>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.tier != ResolutionTier::Incomplete && self.mapping.is_complete()
    }

    /// A person should look at the mapping before confirming
    pub fn needs_review(&self) -> bool {
        matches!(self.tier, ResolutionTier::Partial | ResolutionTier::Incomplete)
    }

    /// Names of the required roles that are unresolved
    pub fn missing(&self) -> Vec<String> {
        self.mapping
            .missing_roles()
            .iter()
            .map(|role| role.as_str().to_string())
            .collect()
    }
}

/// A format the registry can apply by id
#[derive(Debug, Clone, Serialize)]
pub struct KnownFormat {
    pub id: String,
    pub name: String,
    pub builtin: bool,
    pub mapping: FormatMapping,
}

/// Resolves mappings from hints, detectors and inference
pub struct FormatRegistry {
    settings: ImportSettings,
    inference: ColumnInference,
    saved: Option<Arc<dyn SavedFormatStore>>,
}

impl FormatRegistry {
    pub fn new(settings: ImportSettings) -> Self {
        let inference = ColumnInference::new(settings.sample_rows, settings.role_min_confidence);
        Self {
            settings,
            inference,
            saved: None,
        }
    }

    /// Also look up format ids in a saved format store
    pub fn with_saved_formats(mut self, store: Arc<dyn SavedFormatStore>) -> Self {
        self.saved = Some(store);
        self
    }

    /// Resolve the mapping for `table`
    pub fn resolve(&self, table: &Table, hint: Option<&FormatHint>) -> Result<Resolution> {
        let detector_scores = self.score_detectors(table);

        match hint {
            Some(FormatHint::Explicit(mapping)) => {
                Ok(self.provided(table, mapping.clone(), MappingOrigin::Explicit, detector_scores))
            }
            Some(FormatHint::FormatId(id)) => {
                let (mapping, origin) = self.lookup(id)?;
                Ok(self.provided(table, mapping, origin, detector_scores))
            }
            None => Ok(self.detect_or_infer(table, detector_scores)),
        }
    }

    /// Built-in formats followed by saved ones
    pub fn known_formats(&self) -> Result<Vec<KnownFormat>> {
        let mut formats: Vec<KnownFormat> = builtin_detectors()
            .iter()
            .map(|d| KnownFormat {
                id: d.id().to_string(),
                name: d.name().to_string(),
                builtin: true,
                mapping: d.mapping(),
            })
            .collect();

        if let Some(store) = &self.saved {
            formats.extend(store.list()?.into_iter().map(|mapping| KnownFormat {
                id: mapping.format_id.clone(),
                name: mapping.format_id.clone(),
                builtin: false,
                mapping,
            }));
        }
        Ok(formats)
    }

    /// Mapping for a format id, built-in first
    pub fn lookup(&self, id: &str) -> Result<(FormatMapping, MappingOrigin)> {
        if let Some(detector) = builtin_detector(id) {
            return Ok((
                detector.mapping(),
                MappingOrigin::Builtin {
                    id: detector.id().to_string(),
                    name: detector.name().to_string(),
                },
            ));
        }
        if let Some(store) = &self.saved {
            if let Some(mapping) = store.lookup(id)? {
                return Ok((mapping, MappingOrigin::Saved { id: id.to_string() }));
            }
        }
        Err(Error::not_found(format!("format '{}'", id)))
    }

    fn score_detectors(&self, table: &Table) -> Vec<DetectorScore> {
        let sample = table.sample(self.settings.sample_rows);
        let mut scores: Vec<DetectorScore> = builtin_detectors()
            .iter()
            .map(|d| DetectorScore {
                id: d.id().to_string(),
                name: d.name().to_string(),
                score: d.detect(&table.headers, sample).clamp(0.0, 1.0),
            })
            .collect();
        // Stable: equal scores keep registration order
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }

    fn provided(
        &self,
        table: &Table,
        mapping: FormatMapping,
        origin: MappingOrigin,
        detector_scores: Vec<DetectorScore>,
    ) -> Resolution {
        let tier = if mapping.is_complete() {
            ResolutionTier::Provided
        } else {
            ResolutionTier::Incomplete
        };
        let column_hints = hints_from_mapping(table, &mapping, 1.0);
        Resolution {
            completeness: mapping.completeness(),
            role_confidence: role_confidence(&column_hints),
            mapping,
            origin,
            tier,
            column_hints,
            detector_scores,
        }
    }

    fn detect_or_infer(&self, table: &Table, detector_scores: Vec<DetectorScore>) -> Resolution {
        let applicable = detector_scores.iter().find(|s| {
            s.score >= self.settings.partial_threshold
                && builtin_detector(&s.id).map_or(false, |d| columns_present(table, &d.mapping()))
        });

        if let Some(best) = applicable {
            if let Some(detector) = builtin_detector(&best.id) {
                let mapping = detector.mapping();
                let tier = if best.score >= self.settings.auto_apply_threshold {
                    ResolutionTier::AutoApplied
                } else {
                    ResolutionTier::Partial
                };
                let column_hints = hints_from_mapping(table, &mapping, best.score);
                return Resolution {
                    completeness: mapping.completeness(),
                    role_confidence: role_confidence(&column_hints),
                    origin: MappingOrigin::Detected {
                        id: best.id.clone(),
                        name: best.name.clone(),
                        score: best.score,
                    },
                    mapping,
                    tier,
                    column_hints,
                    detector_scores,
                };
            }
        }

        let inference = self.inference.infer(&table.headers, &table.rows);
        let tier = if inference.mapping.is_complete() {
            ResolutionTier::Inferred
        } else {
            ResolutionTier::Incomplete
        };
        Resolution {
            completeness: inference.mapping.completeness(),
            role_confidence: role_confidence(&inference.hints),
            mapping: inference.mapping,
            origin: MappingOrigin::Inferred,
            tier,
            column_hints: inference.hints,
            detector_scores,
        }
    }
}

/// Every column the mapping names exists in the table
fn columns_present(table: &Table, mapping: &FormatMapping) -> bool {
    mapping
        .referenced_columns()
        .iter()
        .all(|(_, column)| table.column_index(column).is_some())
}

fn hints_from_mapping(table: &Table, mapping: &FormatMapping, confidence: f64) -> Vec<ColumnHint> {
    let referenced = mapping.referenced_columns();
    table
        .headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            match referenced
                .iter()
                .find(|(_, column)| table.column_index(column) == Some(index))
            {
                Some((role, _)) => ColumnHint {
                    column_name: header.clone(),
                    inferred_role: *role,
                    confidence,
                    detected_subtype: (*role == ColumnRole::Date)
                        .then(|| mapping.date_format_pattern.clone()),
                },
                None => ColumnHint::unknown(header.clone()),
            }
        })
        .collect()
}

fn role_confidence(hints: &[ColumnHint]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for hint in hints.iter().filter(|h| h.inferred_role != ColumnRole::Unknown) {
        let entry = out.entry(hint.inferred_role.as_str().to_string()).or_insert(0.0);
        if hint.confidence > *entry {
            *entry = hint.confidence;
        }
    }
    out
}
