use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Active,
    Inactive,
    Graduated,
    Transferred,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Active => "active",
            StudentStatus::Inactive => "inactive",
            StudentStatus::Graduated => "graduated",
            StudentStatus::Transferred => "transferred",
        }
    }
}

impl FromStr for StudentStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(StudentStatus::Active),
            "inactive" => Ok(StudentStatus::Inactive),
            "graduated" => Ok(StudentStatus::Graduated),
            "transferred" => Ok(StudentStatus::Transferred),
            other => anyhow::bail!("unknown student status '{other}'"),
        }
    }
}

/// Active/Inactive flag shared by subjects, sections, school years,
/// grading components and subject assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "Active",
            RecordStatus::Inactive => "Inactive",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RecordStatus::Active)
    }
}

impl FromStr for RecordStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(RecordStatus::Active),
            "inactive" => Ok(RecordStatus::Inactive),
            other => anyhow::bail!("unknown status '{other}'"),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Junior high grade level, 7 through 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GradeLevel(i16);

impl GradeLevel {
    pub const MIN: i16 = 7;
    pub const MAX: i16 = 10;

    pub fn new(level: i16) -> anyhow::Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&level) {
            anyhow::bail!(
                "grade level {level} outside {}..={}",
                Self::MIN,
                Self::MAX
            );
        }
        Ok(Self(level))
    }
}

impl fmt::Display for GradeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grade {}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub student_number: i32,
    pub full_name: String,
    pub grade_level: GradeLevel,
    pub section_id: Option<Uuid>,
    pub status: StudentStatus,
}

#[derive(Debug, Clone)]
pub struct Subject {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub department: String,
    pub grade_level: Option<GradeLevel>,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    Quiz,
    Exam,
    Project,
}

impl ScoreKind {
    pub const ALL: [ScoreKind; 3] = [ScoreKind::Quiz, ScoreKind::Exam, ScoreKind::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreKind::Quiz => "quiz",
            ScoreKind::Exam => "exam",
            ScoreKind::Project => "project",
        }
    }
}

impl FromStr for ScoreKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quiz" => Ok(ScoreKind::Quiz),
            "exam" => Ok(ScoreKind::Exam),
            "project" => Ok(ScoreKind::Project),
            other => anyhow::bail!("unknown score kind '{other}'"),
        }
    }
}

impl fmt::Display for ScoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ScoreRecord {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub kind: ScoreKind,
    pub sequence: i32,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceMark {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceMark {
    pub fn code(&self) -> char {
        match self {
            AttendanceMark::Present => 'P',
            AttendanceMark::Absent => 'A',
            AttendanceMark::Late => 'L',
            AttendanceMark::Excused => 'E',
        }
    }

    /// Parses a single mark code. `-` and blanks are unset marks.
    pub fn parse_code(value: &str) -> anyhow::Result<Option<Self>> {
        match value.trim().to_ascii_uppercase().as_str() {
            "" | "-" => Ok(None),
            "P" => Ok(Some(AttendanceMark::Present)),
            "A" => Ok(Some(AttendanceMark::Absent)),
            "L" => Ok(Some(AttendanceMark::Late)),
            "E" => Ok(Some(AttendanceMark::Excused)),
            other => anyhow::bail!("unknown attendance mark '{other}'"),
        }
    }
}

pub const SESSIONS_PER_WEEK: usize = 4;

pub type WeekMarks = [Option<AttendanceMark>; SESSIONS_PER_WEEK];

#[derive(Debug, Clone)]
pub struct WeeklySession {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub week_number: i32,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub sessions_per_week: i16,
}

#[derive(Debug, Clone)]
pub struct WeeklyRecord {
    pub session_id: Uuid,
    pub subject_id: Uuid,
    pub student_id: Uuid,
    pub marks: WeekMarks,
}

#[derive(Debug, Clone)]
pub struct GradingComponent {
    pub id: Uuid,
    pub name: String,
    pub weight: f64,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Heuristic,
    Model,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionSource::Heuristic => "heuristic",
            PredictionSource::Model => "model",
        }
    }
}

impl FromStr for PredictionSource {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "heuristic" => Ok(PredictionSource::Heuristic),
            "model" => Ok(PredictionSource::Model),
            other => anyhow::bail!("unknown prediction source '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredPrediction {
    pub subject_id: Uuid,
    pub predicted_grade: f64,
    pub category: String,
    pub source: PredictionSource,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_level_rejects_out_of_range() {
        assert!(GradeLevel::new(6).is_err());
        assert!(GradeLevel::new(11).is_err());
        assert_eq!(GradeLevel::new(9).unwrap().to_string(), "Grade 9");
    }

    #[test]
    fn attendance_codes_parse_unset_as_none() {
        assert_eq!(AttendanceMark::parse_code("-").unwrap(), None);
        assert_eq!(AttendanceMark::parse_code(" ").unwrap(), None);
        assert_eq!(
            AttendanceMark::parse_code("l").unwrap(),
            Some(AttendanceMark::Late)
        );
        assert!(AttendanceMark::parse_code("X").is_err());
    }

    #[test]
    fn statuses_parse_case_insensitively() {
        assert_eq!(
            "Graduated".parse::<StudentStatus>().unwrap(),
            StudentStatus::Graduated
        );
        assert_eq!("ACTIVE".parse::<RecordStatus>().unwrap(), RecordStatus::Active);
        assert_eq!("project".parse::<ScoreKind>().unwrap(), ScoreKind::Project);
    }
}
