use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::attendance;
use crate::models::{ScoreKind, ScoreRecord, Student, Subject, WeeklyRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PerformanceCategory {
    Excellent,
    Good,
    Average,
    #[serde(rename = "At Risk")]
    AtRisk,
}

impl PerformanceCategory {
    pub const ALL: [PerformanceCategory; 4] = [
        PerformanceCategory::Excellent,
        PerformanceCategory::Good,
        PerformanceCategory::Average,
        PerformanceCategory::AtRisk,
    ];

    pub fn from_grade(grade: f64) -> Self {
        if grade >= 90.0 {
            PerformanceCategory::Excellent
        } else if grade >= 80.0 {
            PerformanceCategory::Good
        } else if grade >= 70.0 {
            PerformanceCategory::Average
        } else {
            PerformanceCategory::AtRisk
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PerformanceCategory::Excellent => "Excellent",
            PerformanceCategory::Good => "Good",
            PerformanceCategory::Average => "Average",
            PerformanceCategory::AtRisk => "At Risk",
        }
    }

    pub fn range_label(&self) -> &'static str {
        match self {
            PerformanceCategory::Excellent => "Excellent (90+)",
            PerformanceCategory::Good => "Good (80-89)",
            PerformanceCategory::Average => "Average (70-79)",
            PerformanceCategory::AtRisk => "At Risk (<70)",
        }
    }
}

impl fmt::Display for PerformanceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The four category averages of one (student, subject) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryAverages {
    pub quiz: Option<f64>,
    pub exam: Option<f64>,
    pub project: Option<f64>,
    pub attendance: Option<f64>,
}

impl CategoryAverages {
    pub fn present(&self) -> Vec<f64> {
        [self.quiz, self.exam, self.project, self.attendance]
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }

    pub fn set_kind(&mut self, kind: ScoreKind, value: Option<f64>) {
        match kind {
            ScoreKind::Quiz => self.quiz = value,
            ScoreKind::Exam => self.exam = value,
            ScoreKind::Project => self.project = value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectGrade {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub quiz_average: Option<f64>,
    pub exam_average: Option<f64>,
    pub project_average: Option<f64>,
    pub attendance_average: Option<f64>,
    pub overall_grade: Option<f64>,
    pub category: Option<PerformanceCategory>,
}

impl SubjectGrade {
    pub fn from_averages(student_id: Uuid, subject_id: Uuid, averages: CategoryAverages) -> Self {
        let overall_grade = overall_grade(&averages);
        Self {
            student_id,
            subject_id,
            quiz_average: averages.quiz,
            exam_average: averages.exam,
            project_average: averages.project,
            attendance_average: averages.attendance,
            overall_grade,
            category: overall_grade.map(PerformanceCategory::from_grade),
        }
    }

    pub fn averages(&self) -> CategoryAverages {
        CategoryAverages {
            quiz: self.quiz_average,
            exam: self.exam_average,
            project: self.project_average,
            attendance: self.attendance_average,
        }
    }
}

/// Mean of the scores, `None` for an empty list rather than zero.
pub fn category_average(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// Mean of whichever category averages exist. Missing categories do not drag
/// the grade down.
pub fn overall_grade(averages: &CategoryAverages) -> Option<f64> {
    category_average(&averages.present())
}

/// Derives the grade record for one pair. A pair with no data yields all
/// fields absent.
pub fn grade_for(
    student_id: Uuid,
    subject_id: Uuid,
    scores: &[ScoreRecord],
    attendance_records: &[WeeklyRecord],
) -> SubjectGrade {
    let mut averages = CategoryAverages::default();
    for kind in ScoreKind::ALL {
        let values: Vec<f64> = scores
            .iter()
            .filter(|score| {
                score.student_id == student_id && score.subject_id == subject_id && score.kind == kind
            })
            .map(|score| score.score)
            .collect();
        averages.set_kind(kind, category_average(&values));
    }
    averages.attendance = attendance::subject_attendance(
        attendance_records
            .iter()
            .filter(|record| record.student_id == student_id && record.subject_id == subject_id),
    );
    SubjectGrade::from_averages(student_id, subject_id, averages)
}

/// Grade records for every (student, subject) pair that has at least one
/// data point, ordered by student then subject name.
pub fn build_gradebook(
    students: &[Student],
    subjects: &[Subject],
    scores: &[ScoreRecord],
    attendance_records: &[WeeklyRecord],
) -> Vec<SubjectGrade> {
    let mut scores_by_pair: HashMap<(Uuid, Uuid), BTreeMap<ScoreKind, Vec<f64>>> = HashMap::new();
    for score in scores {
        scores_by_pair
            .entry((score.student_id, score.subject_id))
            .or_default()
            .entry(score.kind)
            .or_default()
            .push(score.score);
    }

    let mut records_by_pair: HashMap<(Uuid, Uuid), Vec<&WeeklyRecord>> = HashMap::new();
    for record in attendance_records {
        records_by_pair
            .entry((record.student_id, record.subject_id))
            .or_default()
            .push(record);
    }

    let mut ordered_subjects: Vec<&Subject> = subjects.iter().collect();
    ordered_subjects.sort_by(|a, b| a.name.cmp(&b.name));

    let mut grades = Vec::new();
    for student in students {
        for subject in ordered_subjects.iter() {
            let key = (student.id, subject.id);
            let mut averages = CategoryAverages::default();

            if let Some(by_kind) = scores_by_pair.get(&key) {
                for (kind, values) in by_kind {
                    averages.set_kind(*kind, category_average(values));
                }
            }
            if let Some(records) = records_by_pair.get(&key) {
                averages.attendance = attendance::subject_attendance(records.iter().copied());
            }

            if averages.is_empty() {
                continue;
            }
            grades.push(SubjectGrade::from_averages(student.id, subject.id, averages));
        }
    }

    grades
}
