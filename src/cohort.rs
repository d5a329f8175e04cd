use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::error::AccessError;
use crate::grades::{PerformanceCategory, SubjectGrade};
use crate::models::{Student, StudentStatus, Subject};

pub const AT_RISK_THRESHOLD: f64 = 70.0;

/// Whose data a dashboard may read.
#[derive(Debug, Clone)]
pub enum Viewer {
    Admin,
    Faculty { subject_ids: HashSet<Uuid> },
    Student { student_id: Uuid },
}

impl Viewer {
    pub fn can_view(&self, student_id: Uuid, subject_id: Uuid) -> bool {
        match self {
            Viewer::Admin => true,
            Viewer::Faculty { subject_ids } => subject_ids.contains(&subject_id),
            Viewer::Student { student_id: own } => *own == student_id,
        }
    }

    /// Students only read; faculty write to their own subjects.
    pub fn can_edit(&self, subject_id: Uuid) -> bool {
        match self {
            Viewer::Admin => true,
            Viewer::Faculty { subject_ids } => subject_ids.contains(&subject_id),
            Viewer::Student { .. } => false,
        }
    }

    /// Whole-class data of a subject: attendance sheets, predictions.
    pub fn can_view_class(&self, subject_id: Uuid) -> bool {
        match self {
            Viewer::Admin => true,
            Viewer::Faculty { subject_ids } => subject_ids.contains(&subject_id),
            Viewer::Student { .. } => false,
        }
    }

    pub fn require_admin(&self, action: &str) -> Result<(), AccessError> {
        match self {
            Viewer::Admin => Ok(()),
            _ => Err(AccessError::AdminOnly {
                action: action.to_string(),
            }),
        }
    }

    pub fn require_staff(&self) -> Result<(), AccessError> {
        match self {
            Viewer::Student { .. } => Err(AccessError::StaffOnly),
            _ => Ok(()),
        }
    }

    pub fn require_edit(&self, subject: &Subject) -> Result<(), AccessError> {
        if self.can_edit(subject.id) {
            Ok(())
        } else {
            Err(AccessError::EditDenied {
                subject: subject.code.clone(),
            })
        }
    }

    pub fn require_class_view(&self, subject: &Subject) -> Result<(), AccessError> {
        if self.can_view_class(subject.id) {
            Ok(())
        } else {
            Err(AccessError::ViewDenied {
                subject: subject.code.clone(),
            })
        }
    }

    pub fn scope(&self, grades: Vec<SubjectGrade>) -> Vec<SubjectGrade> {
        grades
            .into_iter()
            .filter(|grade| self.can_view(grade.student_id, grade.subject_id))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AtRiskEntry {
    pub student_id: Uuid,
    pub student_name: String,
    pub subject_code: String,
    pub subject_name: String,
    pub overall_grade: f64,
    pub quiz_average: Option<f64>,
    pub exam_average: Option<f64>,
    pub project_average: Option<f64>,
    pub attendance_average: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Distribution {
    pub excellent: usize,
    pub good: usize,
    pub average: usize,
    pub at_risk: usize,
}

impl Distribution {
    pub fn count(&self, category: PerformanceCategory) -> usize {
        match category {
            PerformanceCategory::Excellent => self.excellent,
            PerformanceCategory::Good => self.good,
            PerformanceCategory::Average => self.average,
            PerformanceCategory::AtRisk => self.at_risk,
        }
    }

    fn bump(&mut self, category: PerformanceCategory) {
        match category {
            PerformanceCategory::Excellent => self.excellent += 1,
            PerformanceCategory::Good => self.good += 1,
            PerformanceCategory::Average => self.average += 1,
            PerformanceCategory::AtRisk => self.at_risk += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.excellent + self.good + self.average + self.at_risk
    }
}

/// Every (student, subject) pair currently under the threshold, lowest grade first.
pub fn at_risk_pairs(
    grades: &[SubjectGrade],
    students: &[Student],
    subjects: &[Subject],
) -> Vec<AtRiskEntry> {
    let students: HashMap<Uuid, &Student> = students.iter().map(|s| (s.id, s)).collect();
    let subjects: HashMap<Uuid, &Subject> = subjects.iter().map(|s| (s.id, s)).collect();

    let mut entries: Vec<AtRiskEntry> = grades
        .iter()
        .filter_map(|grade| {
            let overall = grade.overall_grade?;
            if overall >= AT_RISK_THRESHOLD {
                return None;
            }
            let student = students.get(&grade.student_id)?;
            let subject = subjects.get(&grade.subject_id)?;
            Some(AtRiskEntry {
                student_id: student.id,
                student_name: student.full_name.clone(),
                subject_code: subject.code.clone(),
                subject_name: subject.name.clone(),
                overall_grade: overall,
                quiz_average: grade.quiz_average,
                exam_average: grade.exam_average,
                project_average: grade.project_average,
                attendance_average: grade.attendance_average,
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        a.overall_grade
            .partial_cmp(&b.overall_grade)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.student_name.cmp(&b.student_name))
    });
    entries
}

/// Buckets each active student once. Any subject under the threshold puts
/// the student in At Risk; otherwise the best subject grade decides.
pub fn distribution(grades: &[SubjectGrade], students: &[Student]) -> Distribution {
    let mut extremes: HashMap<Uuid, (f64, f64)> = HashMap::new();
    for grade in grades {
        let Some(overall) = grade.overall_grade else {
            continue;
        };
        extremes
            .entry(grade.student_id)
            .and_modify(|(worst, best)| {
                *worst = worst.min(overall);
                *best = best.max(overall);
            })
            .or_insert((overall, overall));
    }

    let mut counts = Distribution::default();
    for student in students.iter().filter(|s| s.status == StudentStatus::Active) {
        let Some((worst, best)) = extremes.get(&student.id) else {
            continue;
        };
        if *worst < AT_RISK_THRESHOLD {
            counts.bump(PerformanceCategory::AtRisk);
        } else {
            counts.bump(PerformanceCategory::from_grade(*best));
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::CategoryAverages;
    use crate::models::{GradeLevel, RecordStatus};

    fn student(name: &str, status: StudentStatus) -> Student {
        Student {
            id: Uuid::new_v4(),
            student_number: 2001,
            full_name: name.to_string(),
            grade_level: GradeLevel::new(8).unwrap(),
            section_id: None,
            status,
        }
    }

    fn subject(code: &str) -> Subject {
        Subject {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: format!("{code} subject"),
            department: "General".to_string(),
            grade_level: None,
            status: RecordStatus::Active,
        }
    }

    fn graded(student: &Student, subject: &Subject, quiz: f64) -> SubjectGrade {
        SubjectGrade::from_averages(
            student.id,
            subject.id,
            CategoryAverages {
                quiz: Some(quiz),
                ..CategoryAverages::default()
            },
        )
    }

    #[test]
    fn one_failing_subject_counts_student_once_as_at_risk() {
        let kiara = student("Kiara Patel", StudentStatus::Active);
        let a = subject("A");
        let b = subject("B");
        let grades = vec![graded(&kiara, &a, 95.0), graded(&kiara, &b, 60.0)];

        let counts = distribution(&grades, std::slice::from_ref(&kiara));
        assert_eq!(counts.at_risk, 1);
        assert_eq!(counts.excellent, 0);
        assert_eq!(counts.total(), 1);
    }

    #[test]
    fn passing_students_bucket_by_best_grade() {
        let avery = student("Avery Lee", StudentStatus::Active);
        let jules = student("Jules Moreno", StudentStatus::Active);
        let gone = student("Sam Cruz", StudentStatus::Transferred);
        let ungraded = student("Rin Sato", StudentStatus::Active);
        let a = subject("A");
        let b = subject("B");
        let grades = vec![
            graded(&avery, &a, 92.0),
            graded(&avery, &b, 74.0),
            graded(&jules, &a, 81.0),
            graded(&gone, &a, 50.0),
        ];

        let counts = distribution(&grades, &[avery, jules, gone, ungraded]);
        assert_eq!(counts.excellent, 1);
        assert_eq!(counts.good, 1);
        assert_eq!(counts.average, 0);
        assert_eq!(counts.at_risk, 0);
    }

    #[test]
    fn at_risk_pairs_sorted_by_grade() {
        let avery = student("Avery Lee", StudentStatus::Active);
        let jules = student("Jules Moreno", StudentStatus::Active);
        let a = subject("A");
        let b = subject("B");
        let grades = vec![
            graded(&avery, &a, 95.0),
            graded(&avery, &b, 65.0),
            graded(&jules, &a, 69.99),
            graded(&jules, &b, 70.0),
            graded(&jules, &a, 40.0),
        ];

        let entries = at_risk_pairs(&grades, &[avery, jules], &[a, b]);
        let found: Vec<f64> = entries.iter().map(|e| e.overall_grade).collect();
        assert_eq!(found, vec![40.0, 65.0, 69.99]);
        assert_eq!(entries[1].subject_code, "B");
    }

    #[test]
    fn viewer_scopes_pairs() {
        let avery = student("Avery Lee", StudentStatus::Active);
        let jules = student("Jules Moreno", StudentStatus::Active);
        let a = subject("A");
        let b = subject("B");
        let grades = vec![graded(&avery, &a, 90.0), graded(&jules, &b, 80.0)];

        let faculty = Viewer::Faculty {
            subject_ids: HashSet::from([b.id]),
        };
        let scoped = faculty.scope(grades.clone());
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].student_id, jules.id);

        let own = Viewer::Student { student_id: avery.id };
        assert_eq!(own.scope(grades.clone()).len(), 1);
        assert_eq!(Viewer::Admin.scope(grades).len(), 2);

        assert!(faculty.can_edit(b.id));
        assert!(!faculty.can_edit(a.id));
        assert!(!own.can_edit(a.id));
        assert!(Viewer::Admin.can_edit(a.id));
    }

    #[test]
    fn faculty_limited_to_assigned_subjects() {
        let math = subject("MATH7");
        let english = subject("ENG8");
        let faculty = Viewer::Faculty {
            subject_ids: HashSet::from([math.id]),
        };

        assert!(faculty.require_edit(&math).is_ok());
        assert!(faculty.require_class_view(&math).is_ok());
        assert_eq!(
            faculty.require_edit(&english).unwrap_err(),
            AccessError::EditDenied {
                subject: "ENG8".to_string()
            }
        );
        assert_eq!(
            faculty.require_class_view(&english).unwrap_err().to_string(),
            "not permitted to view class records for ENG8"
        );

        let own = Viewer::Student {
            student_id: Uuid::new_v4(),
        };
        assert!(own.require_class_view(&math).is_err());
        assert_eq!(own.require_staff().unwrap_err(), AccessError::StaffOnly);
        assert!(Viewer::Admin.require_class_view(&english).is_ok());
    }

    #[test]
    fn only_admin_passes_admin_gate() {
        let faculty = Viewer::Faculty {
            subject_ids: HashSet::new(),
        };
        assert!(Viewer::Admin.require_admin("seeding").is_ok());
        assert!(faculty.require_staff().is_ok());
        assert_eq!(
            faculty.require_admin("seeding").unwrap_err().to_string(),
            "seeding is limited to administrators"
        );
    }
}
