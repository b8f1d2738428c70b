// ABOUTME: Parses input-mapping source strings ("steps.s1.output.summary") into SourcePath.
// ABOUTME: Parsing happens once at plan-build time; resolution works on the parsed variants.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A path string that starts with a reserved resolver prefix but does not fit its grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("'{0}': step references must look like steps.<stepId>.output[.<field>]")]
    MalformedStepRef(String),

    #[error("'{0}': all_outputs does not take a field")]
    AllOutputsWithField(String),

    #[error("'{0}': empty field segment")]
    EmptySegment(String),
}

/// Where one input field of a step gets its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SourcePath {
    /// The run's original input object, or a (nested) field of it.
    UserInput { field: Vec<String> },
    /// A completed step's output, or a (nested) field of it.
    StepOutput { step_id: String, field: Vec<String> },
    /// The shared run context, or a (nested) field of it.
    Context { field: Vec<String> },
    /// The most recently completed step's output, or a (nested) field of it.
    LastOutput { field: Vec<String> },
    /// Every completed step so far as `{stepId, agentName, output}`.
    AllOutputs,
    /// Not a reference; the raw string is the value.
    Literal(String),
}

impl SourcePath {
    /// Parse a mapping source string. Strings that do not start with a
    /// reserved prefix are literals; reserved prefixes with a bad shape are errors.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let mut segments = raw.split('.');
        let head = segments.next().unwrap_or_default();
        let rest: Vec<&str> = segments.collect();

        if !matches!(
            head,
            "user_input" | "steps" | "context" | "last_output" | "all_outputs"
        ) {
            return Ok(SourcePath::Literal(raw.to_string()));
        }
        if rest.iter().any(|s| s.is_empty()) {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        let owned = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        match head {
            "user_input" => Ok(SourcePath::UserInput { field: owned(&rest) }),
            "context" => Ok(SourcePath::Context { field: owned(&rest) }),
            "last_output" => Ok(SourcePath::LastOutput { field: owned(&rest) }),
            "all_outputs" if rest.is_empty() => Ok(SourcePath::AllOutputs),
            "all_outputs" => Err(PathError::AllOutputsWithField(raw.to_string())),
            _ => match rest.as_slice() {
                [step_id, "output", field @ ..] => Ok(SourcePath::StepOutput {
                    step_id: step_id.to_string(),
                    field: owned(field),
                }),
                _ => Err(PathError::MalformedStepRef(raw.to_string())),
            },
        }
    }

    /// Parse, treating malformed references as literals.
    pub fn parse_lenient(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|_| SourcePath::Literal(raw.to_string()))
    }

    /// True for `steps.<id>.output[...]` references.
    pub fn is_step_ref(&self) -> bool {
        matches!(self, SourcePath::StepOutput { .. })
    }
}

fn write_with_field(f: &mut fmt::Formatter<'_>, head: &str, field: &[String]) -> fmt::Result {
    f.write_str(head)?;
    for segment in field {
        write!(f, ".{}", segment)?;
    }
    Ok(())
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePath::UserInput { field } => write_with_field(f, "user_input", field),
            SourcePath::StepOutput { step_id, field } => {
                write!(f, "steps.{}.output", step_id)?;
                write_with_field(f, "", field)
            }
            SourcePath::Context { field } => write_with_field(f, "context", field),
            SourcePath::LastOutput { field } => write_with_field(f, "last_output", field),
            SourcePath::AllOutputs => f.write_str("all_outputs"),
            SourcePath::Literal(raw) => f.write_str(raw),
        }
    }
}

impl From<SourcePath> for String {
    fn from(path: SourcePath) -> Self {
        path.to_string()
    }
}

impl From<String> for SourcePath {
    fn from(raw: String) -> Self {
        SourcePath::parse_lenient(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_resolver_prefix() {
        assert_eq!(
            SourcePath::parse("user_input").unwrap(),
            SourcePath::UserInput { field: vec![] }
        );
        assert_eq!(
            SourcePath::parse("user_input.topic").unwrap(),
            SourcePath::UserInput {
                field: vec!["topic".to_string()]
            }
        );
        assert_eq!(
            SourcePath::parse("steps.step1.output.summary").unwrap(),
            SourcePath::StepOutput {
                step_id: "step1".to_string(),
                field: vec!["summary".to_string()]
            }
        );
        assert_eq!(
            SourcePath::parse("steps.step1.output").unwrap(),
            SourcePath::StepOutput {
                step_id: "step1".to_string(),
                field: vec![]
            }
        );
        assert_eq!(
            SourcePath::parse("context.tone").unwrap(),
            SourcePath::Context {
                field: vec!["tone".to_string()]
            }
        );
        assert_eq!(
            SourcePath::parse("last_output").unwrap(),
            SourcePath::LastOutput { field: vec![] }
        );
        assert_eq!(SourcePath::parse("all_outputs").unwrap(), SourcePath::AllOutputs);
    }

    #[test]
    fn unknown_prefixes_are_literals() {
        assert_eq!(
            SourcePath::parse("write a haiku").unwrap(),
            SourcePath::Literal("write a haiku".to_string())
        );
        assert_eq!(
            SourcePath::parse("user_inputs.topic").unwrap(),
            SourcePath::Literal("user_inputs.topic".to_string())
        );
    }

    #[test]
    fn malformed_references_are_detected() {
        assert!(matches!(
            SourcePath::parse("steps.step1"),
            Err(PathError::MalformedStepRef(_))
        ));
        assert!(matches!(
            SourcePath::parse("steps.step1.result"),
            Err(PathError::MalformedStepRef(_))
        ));
        assert!(matches!(
            SourcePath::parse("all_outputs.x"),
            Err(PathError::AllOutputsWithField(_))
        ));
        assert!(matches!(
            SourcePath::parse("context..x"),
            Err(PathError::EmptySegment(_))
        ));
        assert_eq!(
            SourcePath::parse_lenient("steps.step1"),
            SourcePath::Literal("steps.step1".to_string())
        );
    }

    #[test]
    fn display_matches_source_string() {
        for raw in [
            "user_input",
            "user_input.a.b",
            "steps.s2.output",
            "steps.s2.output.x",
            "context.tone",
            "last_output.text",
            "all_outputs",
            "plain words",
        ] {
            assert_eq!(SourcePath::parse_lenient(raw).to_string(), raw);
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let path = SourcePath::parse("steps.a.output.b").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"steps.a.output.b\"");
        let back: SourcePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
