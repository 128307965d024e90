// src/models/exam.rs

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

use crate::models::attempt::Attempt;

/// Kind of assessment gating a subsection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamType {
    Timed,
    Proctored,
    Practice,
    Onboarding,
}

/// Prerequisite facts reported by the LMS for proctored exams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrerequisiteStatus {
    #[serde(default)]
    pub are_prerequisites_satisfied: bool,
    #[serde(default)]
    pub failed_prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub pending_prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub declined_prerequisites: Vec<Prerequisite>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Exam attached to a sequence, as returned by the LMS.
///
/// Replaced wholesale on every refetch; the session never patches it
/// except for the embedded attempt's deadline stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub course_id: String,
    pub content_id: String,
    #[serde(default)]
    pub exam_name: String,
    #[serde(rename = "type")]
    pub exam_type: ExamType,
    pub time_limit_mins: i64,
    #[serde(default)]
    pub passed_due_date: bool,
    #[serde(default)]
    pub hide_after_due: bool,
    #[serde(default)]
    pub allow_proctoring_opt_out: bool,
    #[serde(default)]
    pub prerequisite_status: PrerequisiteStatus,

    /// The learner's attempt at this exam. The LMS sends `{}` when there is none.
    #[serde(default, deserialize_with = "empty_object_as_none")]
    pub attempt: Option<Attempt>,
}

impl Exam {
    pub fn is_proctored(&self) -> bool {
        self.exam_type == ExamType::Proctored
    }

    /// Time limit in seconds, used as the base for threshold percentages.
    pub fn time_limit_secs(&self) -> i64 {
        self.time_limit_mins * 60
    }
}

/// Payload of the exam attempts endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamAttemptsData {
    #[serde(default, deserialize_with = "empty_object_as_none")]
    pub exam: Option<Exam>,

    /// The attempt currently running anywhere in the course, which may belong
    /// to a different exam than `exam`.
    #[serde(default, deserialize_with = "empty_object_as_none")]
    pub active_attempt: Option<Attempt>,
}

/// Deserializes `{}` and `null` as `None`; anything else as `T`.
pub(crate) fn empty_object_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) if map.is_empty() => Ok(None),
        _ => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
