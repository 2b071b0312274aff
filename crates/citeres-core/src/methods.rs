//! Retrieval-method configuration and its expansion into concrete testing methods.
//!
//! A configured method such as `az_annotated` with `parameters = [1]` and two
//! runtime-parameter sets expands into one testing method per
//! (parameter, runtime set) pair. Each variant carries only the fields its
//! kind needs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A method parameter as written in the experiment file (`[1, 5]` or `["paragraph"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodParameter {
    Int(i64),
    Text(String),
}

impl fmt::Display for MethodParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocMethodSpec {
    StandardMulti {
        index: String,
        parameters: Vec<MethodParameter>,
        runtime_parameters: Vec<String>,
    },
    IlcMashup {
        index: String,
        parameters: Vec<MethodParameter>,
        ilc_parameters: Vec<MethodParameter>,
        runtime_parameters: Vec<String>,
    },
    AnnotatedBoost {
        index: String,
        parameters: Vec<MethodParameter>,
        /// Named field sets, e.g. `ALL = ["AIM", "BAS", ...]`.
        runtime_parameters: BTreeMap<String, Vec<String>>,
    },
    IlcAnnotatedBoost {
        index: String,
        parameters: Vec<MethodParameter>,
        ilc_parameters: Vec<MethodParameter>,
        runtime_parameters: BTreeMap<String, Vec<String>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    StandardMulti,
    IlcMashup,
    AnnotatedBoost,
    IlcAnnotatedBoost,
}

impl MethodKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StandardMulti => "standard_multi",
            Self::IlcMashup => "ilc_mashup",
            Self::AnnotatedBoost => "annotated_boost",
            Self::IlcAnnotatedBoost => "ilc_annotated_boost",
        }
    }

    /// Boost methods store one contribution per annotated field, so their
    /// weights can be retrained offline.
    pub const fn is_weight_trainable(self) -> bool {
        matches!(self, Self::AnnotatedBoost | Self::IlcAnnotatedBoost)
    }
}

/// One concrete method under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestingMethod {
    pub name: String,
    pub base_method: String,
    pub kind: MethodKind,
    pub parameter: MethodParameter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilc_parameter: Option<MethodParameter>,
    pub index_filename: String,
    pub runtime_parameters: Vec<String>,
}

impl DocMethodSpec {
    pub fn kind(&self) -> MethodKind {
        match self {
            Self::StandardMulti { .. } => MethodKind::StandardMulti,
            Self::IlcMashup { .. } => MethodKind::IlcMashup,
            Self::AnnotatedBoost { .. } => MethodKind::AnnotatedBoost,
            Self::IlcAnnotatedBoost { .. } => MethodKind::IlcAnnotatedBoost,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), String> {
        let (parameters, has_runtime) = match self {
            Self::StandardMulti {
                parameters,
                runtime_parameters,
                ..
            }
            | Self::IlcMashup {
                parameters,
                runtime_parameters,
                ..
            } => (parameters, !runtime_parameters.is_empty()),
            Self::AnnotatedBoost {
                parameters,
                runtime_parameters,
                ..
            }
            | Self::IlcAnnotatedBoost {
                parameters,
                runtime_parameters,
                ..
            } => (
                parameters,
                runtime_parameters.values().all(|fields| !fields.is_empty())
                    && !runtime_parameters.is_empty(),
            ),
        };
        if parameters.is_empty() {
            return Err(format!("doc method '{name}' has no parameters"));
        }
        if !has_runtime {
            return Err(format!(
                "doc method '{name}' needs at least one non-empty runtime parameter set"
            ));
        }
        if let Self::IlcMashup { ilc_parameters, .. }
        | Self::IlcAnnotatedBoost { ilc_parameters, .. } = self
            && ilc_parameters.is_empty()
        {
            return Err(format!("doc method '{name}' has no ilc_parameters"));
        }
        Ok(())
    }

    /// Expands this method into its testing methods, in declaration order.
    pub fn expand(&self, name: &str) -> Vec<TestingMethod> {
        let kind = self.kind();
        let mut out = Vec::new();
        match self {
            Self::StandardMulti {
                index,
                parameters,
                runtime_parameters,
            } => {
                for parameter in parameters {
                    out.push(TestingMethod {
                        name: format!("{name}_{parameter}"),
                        base_method: name.to_string(),
                        kind,
                        parameter: parameter.clone(),
                        ilc_parameter: None,
                        index_filename: format!("{index}_{parameter}"),
                        runtime_parameters: runtime_parameters.clone(),
                    });
                }
            }
            Self::IlcMashup {
                index,
                parameters,
                ilc_parameters,
                runtime_parameters,
            } => {
                for parameter in parameters {
                    for ilc in ilc_parameters {
                        out.push(TestingMethod {
                            name: format!("{name}_{parameter}_{ilc}"),
                            base_method: name.to_string(),
                            kind,
                            parameter: parameter.clone(),
                            ilc_parameter: Some(ilc.clone()),
                            index_filename: format!("{index}_{parameter}_{ilc}"),
                            runtime_parameters: runtime_parameters.clone(),
                        });
                    }
                }
            }
            Self::AnnotatedBoost {
                index,
                parameters,
                runtime_parameters,
            } => {
                for parameter in parameters {
                    for (set_name, fields) in runtime_parameters {
                        out.push(TestingMethod {
                            name: format!("{name}_{parameter}_{set_name}"),
                            base_method: name.to_string(),
                            kind,
                            parameter: parameter.clone(),
                            ilc_parameter: None,
                            index_filename: format!("{index}_{parameter}"),
                            runtime_parameters: fields.clone(),
                        });
                    }
                }
            }
            Self::IlcAnnotatedBoost {
                index,
                parameters,
                ilc_parameters,
                runtime_parameters,
            } => {
                for parameter in parameters {
                    for ilc in ilc_parameters {
                        for (set_name, fields) in runtime_parameters {
                            out.push(TestingMethod {
                                name: format!("{name}_{parameter}_{ilc}_{set_name}"),
                                base_method: name.to_string(),
                                kind,
                                parameter: parameter.clone(),
                                ilc_parameter: Some(ilc.clone()),
                                index_filename: format!("{index}_{parameter}_{ilc}"),
                                runtime_parameters: fields.clone(),
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

/// Expands every configured method; names are unique across the result.
pub fn expand_doc_methods(methods: &BTreeMap<String, DocMethodSpec>) -> Vec<TestingMethod> {
    methods
        .iter()
        .flat_map(|(name, spec)| spec.expand(name))
        .collect()
}
