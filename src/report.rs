use std::collections::HashMap;
use std::fmt::Write;

use uuid::Uuid;

use crate::attendance::{self, AttendanceTally};
use crate::cohort::{AtRiskEntry, Distribution};
use crate::grades::{self, PerformanceCategory, SubjectGrade};
use crate::models::{StoredPrediction, Student, Subject, WeeklyRecord, WeeklySession};

#[derive(Debug, Clone)]
pub struct SubjectSummary {
    pub code: String,
    pub name: String,
    pub student_count: usize,
    pub class_average: Option<f64>,
    pub at_risk_count: usize,
}

#[derive(Debug, Clone)]
pub struct WeekAttendance {
    pub subject_code: String,
    pub week_number: i32,
    pub tally: AttendanceTally,
}

pub fn summarize_by_subject(grades: &[SubjectGrade], subjects: &[Subject]) -> Vec<SubjectSummary> {
    let mut summaries: Vec<SubjectSummary> = subjects
        .iter()
        .filter_map(|subject| {
            let overall: Vec<f64> = grades
                .iter()
                .filter(|grade| grade.subject_id == subject.id)
                .filter_map(|grade| grade.overall_grade)
                .collect();
            if overall.is_empty() {
                return None;
            }
            Some(SubjectSummary {
                code: subject.code.clone(),
                name: subject.name.clone(),
                student_count: overall.len(),
                class_average: grades::category_average(&overall),
                at_risk_count: overall
                    .iter()
                    .filter(|grade| PerformanceCategory::from_grade(**grade) == PerformanceCategory::AtRisk)
                    .count(),
            })
        })
        .collect();

    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    summaries
}

/// Class-wide attendance per subject week, pooled over every student's marks.
pub fn weekly_attendance(
    sessions: &[WeeklySession],
    records: &[WeeklyRecord],
    subjects: &[Subject],
) -> Vec<WeekAttendance> {
    let codes: HashMap<Uuid, &str> = subjects.iter().map(|s| (s.id, s.code.as_str())).collect();
    let mut weeks: Vec<WeekAttendance> = sessions
        .iter()
        .filter_map(|session| {
            let code = codes.get(&session.subject_id)?;
            let tally = attendance::pooled(
                records
                    .iter()
                    .filter(|record| record.session_id == session.id)
                    .map(|record| attendance::week_tally(&record.marks)),
            );
            Some(WeekAttendance {
                subject_code: code.to_string(),
                week_number: session.week_number,
                tally,
            })
        })
        .collect();

    weeks.sort_by(|a, b| {
        a.subject_code
            .cmp(&b.subject_code)
            .then(a.week_number.cmp(&b.week_number))
    });
    weeks
}

fn optional(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.2}"),
        None => "-".to_string(),
    }
}

pub struct CohortReport<'a> {
    pub scope_label: &'a str,
    pub school_year: Option<&'a str>,
    pub distribution: &'a Distribution,
    pub at_risk: &'a [AtRiskEntry],
    pub subjects: Vec<SubjectSummary>,
    pub weeks: Vec<WeekAttendance>,
}

pub fn build_report(report: &CohortReport<'_>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Grade Overview Report");
    let _ = writeln!(
        output,
        "Generated for {} (school year {})",
        report.scope_label,
        report.school_year.unwrap_or("not set")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");

    if report.distribution.total() == 0 {
        let _ = writeln!(output, "No graded students in scope.");
    } else {
        for category in PerformanceCategory::ALL {
            let _ = writeln!(
                output,
                "- {}: {} students",
                category.range_label(),
                report.distribution.count(category)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## At-Risk Students");

    if report.at_risk.is_empty() {
        let _ = writeln!(output, "No students below 70 in any subject.");
    } else {
        for entry in report.at_risk.iter() {
            let _ = writeln!(
                output,
                "- {} in {} ({}): grade {:.2} (quiz {}, exam {}, project {}, attendance {})",
                entry.student_name,
                entry.subject_name,
                entry.subject_code,
                entry.overall_grade,
                optional(entry.quiz_average),
                optional(entry.exam_average),
                optional(entry.project_average),
                optional(entry.attendance_average)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Averages");

    if report.subjects.is_empty() {
        let _ = writeln!(output, "No subjects with recorded grades.");
    } else {
        for summary in report.subjects.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): class average {} across {} students, {} at risk",
                summary.name,
                summary.code,
                optional(summary.class_average),
                summary.student_count,
                summary.at_risk_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekly Attendance");

    if report.weeks.is_empty() {
        let _ = writeln!(output, "No attendance weeks recorded.");
    } else {
        for week in report.weeks.iter() {
            let _ = writeln!(
                output,
                "- {} week {}: {:.2}% ({} of {} marked sessions present)",
                week.subject_code,
                week.week_number,
                week.tally.percentage(),
                week.tally.present,
                week.tally.counted
            );
        }
    }

    output
}

/// Markdown report card for one student.
pub fn build_report_card(
    student: &Student,
    section: Option<&str>,
    grades: &[SubjectGrade],
    subjects: &[Subject],
    predictions: &[StoredPrediction],
) -> String {
    let subjects: HashMap<Uuid, &Subject> = subjects.iter().map(|s| (s.id, s)).collect();
    let mut output = String::new();

    let _ = writeln!(output, "# Report Card: {}", student.full_name);
    let _ = writeln!(
        output,
        "Student #{} | {} | {}",
        student.student_number,
        section.map(str::to_string).unwrap_or_else(|| student.grade_level.to_string()),
        student.status.as_str()
    );
    let _ = writeln!(output);

    if grades.is_empty() {
        let _ = writeln!(output, "No scores or attendance recorded yet.");
        return output;
    }

    let _ = writeln!(
        output,
        "| Subject | Quiz | Exam | Project | Attendance | Grade | Category | Predicted |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|");

    for grade in grades {
        let Some(subject) = subjects.get(&grade.subject_id) else {
            continue;
        };
        let predicted = predictions
            .iter()
            .find(|p| p.subject_id == grade.subject_id)
            .map(|p| {
                format!(
                    "{:.2} ({}, {} {})",
                    p.predicted_grade,
                    p.category,
                    p.source.as_str(),
                    p.computed_at.date_naive()
                )
            })
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} | {} |",
            subject.name,
            optional(grade.quiz_average),
            optional(grade.exam_average),
            optional(grade.project_average),
            optional(grade.attendance_average),
            optional(grade.overall_grade),
            grade
                .category
                .map(|category| category.label())
                .unwrap_or("-"),
            predicted
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::CategoryAverages;
    use crate::models::{AttendanceMark, GradeLevel, RecordStatus, StudentStatus};
    use chrono::NaiveDate;

    fn subject(code: &str, name: &str) -> Subject {
        Subject {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            department: "General".to_string(),
            grade_level: None,
            status: RecordStatus::Active,
        }
    }

    fn graded(subject: &Subject, quiz: f64) -> SubjectGrade {
        SubjectGrade::from_averages(
            Uuid::new_v4(),
            subject.id,
            CategoryAverages {
                quiz: Some(quiz),
                ..CategoryAverages::default()
            },
        )
    }

    #[test]
    fn subject_summaries_average_overall_grades() {
        let math = subject("MATH7", "Mathematics");
        let art = subject("ART7", "Art");
        let idle = subject("PE7", "Physical Education");
        let grades = vec![graded(&math, 90.0), graded(&math, 60.0), graded(&art, 80.0)];

        let summaries = summarize_by_subject(&grades, &[math, art, idle]);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].code, "ART7");
        assert_eq!(summaries[1].student_count, 2);
        assert_eq!(summaries[1].class_average, Some(75.0));
        assert_eq!(summaries[1].at_risk_count, 1);
    }

    #[test]
    fn weekly_attendance_pools_students() {
        let math = subject("MATH7", "Mathematics");
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let session = WeeklySession {
            id: Uuid::new_v4(),
            subject_id: math.id,
            week_number: 1,
            week_start: date,
            week_end: date,
            sessions_per_week: 4,
        };
        let record = |marks| WeeklyRecord {
            session_id: session.id,
            subject_id: math.id,
            student_id: Uuid::new_v4(),
            marks,
        };
        let records = vec![
            record([Some(AttendanceMark::Present); 4]),
            record([Some(AttendanceMark::Absent), Some(AttendanceMark::Present), None, None]),
        ];

        let weeks = weekly_attendance(std::slice::from_ref(&session), &records, &[math]);
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].tally, AttendanceTally { present: 5, counted: 6 });
    }

    #[test]
    fn report_lists_sections() {
        let distribution = Distribution {
            excellent: 1,
            good: 0,
            average: 0,
            at_risk: 1,
        };
        let at_risk = vec![AtRiskEntry {
            student_id: Uuid::new_v4(),
            student_name: "Jules Moreno".to_string(),
            subject_code: "MATH7".to_string(),
            subject_name: "Mathematics 7".to_string(),
            overall_grade: 60.0,
            quiz_average: Some(62.0),
            exam_average: Some(58.0),
            project_average: None,
            attendance_average: None,
        }];
        let report = build_report(&CohortReport {
            scope_label: "all students",
            school_year: Some("2025-2026"),
            distribution: &distribution,
            at_risk: &at_risk,
            subjects: Vec::new(),
            weeks: Vec::new(),
        });

        assert!(report.contains("# Grade Overview Report"));
        assert!(report.contains("- Excellent (90+): 1 students"));
        assert!(report.contains("- At Risk (<70): 1 students"));
        assert!(report.contains("Jules Moreno in Mathematics 7 (MATH7): grade 60.00 (quiz 62.00, exam 58.00, project -, attendance -)"));
        assert!(report.contains("No attendance weeks recorded."));
    }

    #[test]
    fn report_card_shows_missing_categories() {
        let math = subject("MATH7", "Mathematics 7");
        let student = Student {
            id: Uuid::new_v4(),
            student_number: 20260001,
            full_name: "Avery Lee".to_string(),
            grade_level: GradeLevel::new(7).unwrap(),
            section_id: None,
            status: StudentStatus::Active,
        };
        let grade = SubjectGrade::from_averages(
            student.id,
            math.id,
            CategoryAverages {
                quiz: Some(92.0),
                exam: Some(92.0),
                ..CategoryAverages::default()
            },
        );

        let card = build_report_card(&student, Some("Grade 7 Sampaguita"), &[grade], &[math], &[]);
        assert!(card.contains("Student #20260001 | Grade 7 Sampaguita | active"));
        assert!(card.contains("| Mathematics 7 | 92.00 | 92.00 | - | - | 92.00 | Excellent | - |"));

        let empty = build_report_card(&student, None, &[], &[], &[]);
        assert!(empty.contains("Grade 7"));
        assert!(empty.contains("No scores or attendance recorded yet."));
    }
}
