use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// One citation-context evaluation unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub citation_id: String,
    pub file_guid: String,
    pub query_method: String,
    #[serde(default)]
    pub doc_position: u64,
    /// Rhetorical zone of the citing sentence. Precomputed files name it `az`.
    #[serde(default, alias = "az")]
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfc: Option<String>,
    #[serde(default, alias = "citation_multi")]
    pub correct_targets: BTreeSet<String>,
    /// Older exports carry a single target here instead of `citation_multi`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_guid: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub structured_query: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,
}

impl Query {
    pub fn new(
        citation_id: impl Into<String>,
        file_guid: impl Into<String>,
        query_method: impl Into<String>,
        zone: impl Into<String>,
        correct_targets: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            citation_id: citation_id.into(),
            file_guid: file_guid.into(),
            query_method: query_method.into(),
            doc_position: 0,
            zone: zone.into(),
            cfc: None,
            correct_targets: correct_targets.into_iter().map(Into::into).collect(),
            match_guid: None,
            structured_query: serde_json::Value::Null,
            query_text: None,
        }
    }

    pub fn is_correct(&self, guid: &str) -> bool {
        self.correct_targets.contains(guid) || self.match_guid.as_deref() == Some(guid)
    }

    /// Folds the legacy `match_guid` into `correct_targets`.
    pub fn normalize_targets(&mut self) {
        if let Some(guid) = self.match_guid.take()
            && !guid.is_empty()
        {
            self.correct_targets.insert(guid);
        }
    }

    /// What is handed to the search backend: the structured query, or a
    /// reference to the citation when none was stored.
    pub fn search_payload(&self) -> serde_json::Value {
        if self.structured_query.is_null() {
            serde_json::json!({
                "citation_id": self.citation_id,
                "query_method": self.query_method,
            })
        } else {
            self.structured_query.clone()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.citation_id.trim().is_empty() {
            return Err("query citation_id must be non-empty".to_string());
        }
        if self.file_guid.trim().is_empty() {
            return Err(format!(
                "query '{}' has an empty file_guid",
                self.citation_id
            ));
        }
        if self.correct_targets.is_empty() && self.match_guid.is_none() {
            return Err(format!(
                "query '{}' has no correct targets",
                self.citation_id
            ));
        }
        Ok(())
    }
}

/// One retrieved item with its stored per-field score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub guid: String,
    #[serde(alias = "formula")]
    pub contributions: BTreeMap<String, f64>,
}

impl Candidate {
    pub fn new(
        guid: impl Into<String>,
        contributions: impl IntoIterator<Item = (impl Into<String>, f64)>,
    ) -> Self {
        Self {
            guid: guid.into(),
            contributions: contributions
                .into_iter()
                .map(|(field, value)| (field.into(), value))
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in &self.contributions {
            if !value.is_finite() || *value < 0.0 {
                return Err(format!(
                    "candidate '{}' has invalid contribution {field}={value}",
                    self.guid
                ));
            }
        }
        Ok(())
    }

    pub fn field_names(&self) -> BTreeSet<&str> {
        self.contributions.keys().map(String::as_str).collect()
    }
}

/// Field weights in a fixed field order.
///
/// The order is the order of the method's runtime parameters; the optimizer
/// sweeps fields in this order and CSV columns follow it.
#[derive(Debug, Clone, Default)]
pub struct WeightVector {
    entries: Vec<(String, f64)>,
    index: HashMap<String, usize>,
}

impl WeightVector {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (impl Into<String>, f64)>) -> Self {
        let mut weights = Self::default();
        for (field, value) in pairs {
            weights.insert(field.into(), value);
        }
        weights
    }

    pub fn uniform(fields: impl IntoIterator<Item = impl Into<String>>, value: f64) -> Self {
        Self::from_pairs(fields.into_iter().map(|field| (field, value)))
    }

    /// Weight 1 for every field, the canonical baseline.
    pub fn all_ones(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::uniform(fields, 1.0)
    }

    fn insert(&mut self, field: String, value: f64) {
        if let Some(&idx) = self.index.get(&field) {
            self.entries[idx].1 = value;
        } else {
            self.index.insert(field.clone(), self.entries.len());
            self.entries.push((field, value));
        }
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.index.get(field).map(|&idx| self.entries[idx].1)
    }

    /// Sets an existing field; returns false when the field is unknown.
    pub fn set(&mut self, field: &str, value: f64) -> bool {
        match self.index.get(field) {
            Some(&idx) => {
                self.entries[idx].1 = value;
                true
            }
            None => false,
        }
    }

    pub fn value_at(&self, position: usize) -> f64 {
        self.entries[position].1
    }

    pub fn set_at(&mut self, position: usize, value: f64) {
        self.entries[position].1 = value;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(field, _)| field.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .map(|(field, value)| (field.as_str(), *value))
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::from_pairs(self.iter().map(|(field, value)| (field, value * factor)))
    }

    pub fn field_list(&self) -> String {
        self.fields().collect::<Vec<_>>().join(",")
    }
}

impl PartialEq for WeightVector {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Serialize for WeightVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (field, value) in &self.entries {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WeightVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WeightVisitor;

        impl<'de> Visitor<'de> for WeightVisitor {
            type Value = WeightVector;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field name to weight")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut weights = WeightVector::default();
                while let Some((field, value)) = access.next_entry::<String, f64>()? {
                    weights.insert(field, value);
                }
                Ok(weights)
            }
        }

        deserializer.deserialize_map(WeightVisitor)
    }
}

/// One entry of `files_dict.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub resolvable_citations: u64,
    #[serde(default)]
    pub tfidf_models: Vec<RetrievalModel>,
    /// Number of references resolvable inside the collection; drives the random control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_collection_references: Option<u64>,
}

/// Location of one per-document (or corpus-wide) index built for a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalModel {
    pub method: String,
    pub actual_dir: String,
}

/// `guid -> FileEntry`, including the `ALL_FILES` pseudo-entry when present.
pub type FilesDict = BTreeMap<String, FileEntry>;

/// Ranking metric used to select and compare weight vectors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Metric {
    #[default]
    #[serde(rename = "avg_mrr", alias = "mrr")]
    Mrr,
    #[serde(rename = "avg_precision", alias = "precision")]
    Precision,
    #[serde(rename = "avg_ndcg", alias = "ndcg")]
    Ndcg,
    #[serde(rename = "precision_total")]
    PrecisionTotal,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Mrr,
        Metric::Precision,
        Metric::Ndcg,
        Metric::PrecisionTotal,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mrr => "avg_mrr",
            Self::Precision => "avg_precision",
            Self::Ndcg => "avg_ndcg",
            Self::PrecisionTotal => "precision_total",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "avg_mrr" | "mrr" => Ok(Self::Mrr),
            "avg_precision" | "precision" => Ok(Self::Precision),
            "avg_ndcg" | "ndcg" => Ok(Self::Ndcg),
            "precision_total" => Ok(Self::PrecisionTotal),
            other => Err(format!("unknown metric '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_accepts_legacy_field_names() {
        let raw = r#"{
            "citation_id": "c1",
            "file_guid": "j97-3003",
            "query_method": "window_30_30",
            "doc_position": 4,
            "az": "OWN",
            "citation_multi": ["p95-1021"],
            "match_guid": "p95-1022"
        }"#;
        let mut query: Query = serde_json::from_str(raw).expect("parse query");
        assert_eq!(query.zone, "OWN");
        assert!(query.is_correct("p95-1021"));
        assert!(query.is_correct("p95-1022"));
        query.normalize_targets();
        assert_eq!(query.correct_targets.len(), 2);
        assert!(query.match_guid.is_none());
        assert!(query.validate().is_ok());
    }

    #[test]
    fn query_without_targets_is_rejected() {
        let query = Query::new("c1", "g1", "window", "OWN", Vec::<String>::new());
        let err = query.validate().expect_err("no targets");
        assert!(err.contains("no correct targets"));
    }

    #[test]
    fn candidate_reads_formula_alias_and_rejects_negative_contributions() {
        let candidate: Candidate =
            serde_json::from_str(r#"{"guid":"a","formula":{"title":2.0,"abstract":-1.0}}"#)
                .expect("parse candidate");
        assert_eq!(candidate.contributions.len(), 2);
        assert!(candidate.validate().is_err());
    }

    #[test]
    fn weight_vector_keeps_insertion_order() {
        let mut weights = WeightVector::from_pairs([("OWN", 1.0), ("AIM", 3.0), ("BKG", 5.0)]);
        assert_eq!(weights.fields().collect::<Vec<_>>(), vec!["OWN", "AIM", "BKG"]);
        assert!(weights.set("AIM", 4.0));
        assert!(!weights.set("CTR", 4.0));
        assert_eq!(weights.get("AIM"), Some(4.0));

        let json = serde_json::to_string(&weights).expect("serialize weights");
        assert_eq!(json, r#"{"OWN":1.0,"AIM":4.0,"BKG":5.0}"#);
    }

    #[test]
    fn metric_parses_short_and_column_names() {
        assert_eq!("avg_mrr".parse::<Metric>(), Ok(Metric::Mrr));
        assert_eq!("NDCG".parse::<Metric>(), Ok(Metric::Ndcg));
        assert_eq!("precision_total".parse::<Metric>(), Ok(Metric::PrecisionTotal));
        assert!("recall".parse::<Metric>().is_err());
    }
}
