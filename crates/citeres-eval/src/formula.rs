use citeres_core::error::EvalError;
use citeres_core::types::{Candidate, WeightVector};

/// A candidate paired with its weighted score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate<'a> {
    pub candidate: &'a Candidate,
    pub score: f64,
}

/// Candidates in descending score order; ties keep their retrieval order.
#[derive(Debug, Clone, Default)]
pub struct RankedResult<'a> {
    pub entries: Vec<ScoredCandidate<'a>>,
}

impl<'a> RankedResult<'a> {
    pub fn guids(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.entries
            .iter()
            .map(|entry| entry.candidate.guid.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `sum(weights[field] * contribution[field])` over the candidate's fields.
/// The weight fields must be exactly the candidate's formula fields.
pub fn score(candidate: &Candidate, weights: &WeightVector) -> Result<f64, EvalError> {
    let mut total = 0.0;
    for (field, contribution) in &candidate.contributions {
        let Some(weight) = weights.get(field) else {
            return Err(EvalError::InvalidWeightVector {
                field: field.clone(),
                available: weights.field_list(),
            });
        };
        total += weight * contribution;
    }
    if weights.len() != candidate.contributions.len()
        && let Some(extra) = weights
            .fields()
            .find(|field| !candidate.contributions.contains_key(*field))
    {
        return Err(EvalError::InvalidWeightVector {
            field: extra.to_string(),
            available: weights.field_list(),
        });
    }
    Ok(total)
}

pub fn rank<'a>(
    candidates: &'a [Candidate],
    weights: &WeightVector,
) -> Result<RankedResult<'a>, EvalError> {
    let mut entries = candidates
        .iter()
        .map(|candidate| {
            score(candidate, weights).map(|score| ScoredCandidate { candidate, score })
        })
        .collect::<Result<Vec<_>, _>>()?;
    // Vec::sort_by is stable.
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(RankedResult { entries })
}
