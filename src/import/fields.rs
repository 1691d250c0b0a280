use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Logical fields every imported workbook must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    Id,
    Title,
    StepNo,
    Operation,
}

impl RequiredField {
    /// Iteration order used for display and for reporting the first unmapped field.
    pub const ALL: [RequiredField; 4] = [
        RequiredField::Id,
        RequiredField::Title,
        RequiredField::StepNo,
        RequiredField::Operation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequiredField::Id => "id",
            RequiredField::Title => "title",
            RequiredField::StepNo => "step_no",
            RequiredField::Operation => "operation",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RequiredField::Id => "Identifier",
            RequiredField::Title => "Title",
            RequiredField::StepNo => "Step No",
            RequiredField::Operation => "Operation",
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequiredField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequiredField::ALL
            .into_iter()
            .find(|f| f.as_str() == s.trim())
            .ok_or_else(|| {
                format!("unknown field \"{s}\" (expected one of: id, title, step_no, operation)")
            })
    }
}
