use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::{
    AttendanceMark, Student, Subject, WeekMarks, WeeklyRecord, WeeklySession, SESSIONS_PER_WEEK,
};

/// Present and counted totals for one or more weeks. Unset marks are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceTally {
    pub present: u32,
    pub counted: u32,
}

impl AttendanceTally {
    pub fn percentage(&self) -> f64 {
        percentage(self.present, self.counted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeekRow {
    pub week_number: i32,
    pub summary: String,
    pub percentage: f64,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Zero when nothing was marked, never undefined.
pub fn percentage(present: u32, counted: u32) -> f64 {
    if counted == 0 {
        return 0.0;
    }
    round2(present as f64 / counted as f64 * 100.0)
}

pub fn week_tally(marks: &WeekMarks) -> AttendanceTally {
    let mut tally = AttendanceTally::default();
    for mark in marks.iter().flatten() {
        tally.counted += 1;
        if *mark == AttendanceMark::Present {
            tally.present += 1;
        }
    }
    tally
}

/// Sums raw counts across weeks before dividing; weeks with more marked
/// sessions weigh more than sparse ones.
pub fn pooled<I>(tallies: I) -> AttendanceTally
where
    I: IntoIterator<Item = AttendanceTally>,
{
    tallies
        .into_iter()
        .fold(AttendanceTally::default(), |acc, week| AttendanceTally {
            present: acc.present + week.present,
            counted: acc.counted + week.counted,
        })
}

/// Attendance category average for one student in one subject, or `None`
/// when no session carries a marked entry for them.
pub fn subject_attendance<'a, I>(records: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a WeeklyRecord>,
{
    let tally = pooled(records.into_iter().map(|record| week_tally(&record.marks)));
    if tally.counted == 0 {
        None
    } else {
        Some(tally.percentage())
    }
}

/// Parses a comma separated week such as `P,L,-,A`. Missing trailing
/// sessions are unset.
pub fn parse_week_marks(field: &str, raw: &str) -> Result<WeekMarks, ValidationError> {
    let codes: Vec<&str> = raw.split(',').collect();
    if codes.len() > SESSIONS_PER_WEEK {
        return Err(ValidationError::new(
            field,
            format!("at most {SESSIONS_PER_WEEK} sessions per week"),
        ));
    }
    let mut marks: WeekMarks = [None; SESSIONS_PER_WEEK];
    for (slot, code) in marks.iter_mut().zip(codes) {
        *slot = AttendanceMark::parse_code(code)
            .map_err(|err| ValidationError::new(field, err.to_string()))?;
    }
    Ok(marks)
}

/// Attendance can only be marked for students enrolled in the subject.
pub fn ensure_enrolled(
    enrolled: &[Uuid],
    student: &Student,
    subject: &Subject,
) -> Result<(), ValidationError> {
    if enrolled.contains(&student.id) {
        return Ok(());
    }
    Err(ValidationError::new(
        "student",
        format!(
            "{} (#{}) is not enrolled in {}",
            student.full_name, student.student_number, subject.code
        ),
    ))
}

pub fn marks_summary(marks: &WeekMarks) -> String {
    marks
        .iter()
        .map(|mark| match mark {
            Some(mark) => mark.code().to_string(),
            None => "-".to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// One row per session of the subject, in week order. Weeks the student has
/// no record for show `-` and 0%.
pub fn week_breakdown(sessions: &[WeeklySession], records: &[&WeeklyRecord]) -> Vec<WeekRow> {
    let mut ordered: Vec<&WeeklySession> = sessions.iter().collect();
    ordered.sort_by_key(|session| session.week_number);

    ordered
        .into_iter()
        .map(|session| {
            match records.iter().find(|record| record.session_id == session.id) {
                Some(record) => WeekRow {
                    week_number: session.week_number,
                    summary: marks_summary(&record.marks),
                    percentage: week_tally(&record.marks).percentage(),
                },
                None => WeekRow {
                    week_number: session.week_number,
                    summary: "-".to_string(),
                    percentage: 0.0,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GradeLevel, RecordStatus, StudentStatus};
    use chrono::NaiveDate;
    use AttendanceMark::{Absent, Excused, Late, Present};

    fn record(session_id: Uuid, marks: WeekMarks) -> WeeklyRecord {
        WeeklyRecord {
            session_id,
            subject_id: Uuid::nil(),
            student_id: Uuid::nil(),
            marks,
        }
    }

    #[test]
    fn late_is_counted_but_not_present() {
        let tally = week_tally(&[Some(Present), Some(Present), Some(Absent), Some(Late)]);
        assert_eq!(tally, AttendanceTally { present: 2, counted: 4 });
        assert_eq!(tally.percentage(), 50.0);
    }

    #[test]
    fn unset_marks_are_not_counted() {
        let tally = week_tally(&[Some(Present), None, Some(Excused), None]);
        assert_eq!(tally, AttendanceTally { present: 1, counted: 2 });
        assert_eq!(week_tally(&[None; 4]).percentage(), 0.0);
    }

    #[test]
    fn pooling_differs_from_averaging_weeks() {
        let weeks = [
            AttendanceTally { present: 2, counted: 4 },
            AttendanceTally { present: 3, counted: 3 },
        ];
        let total = pooled(weeks);
        assert_eq!(total, AttendanceTally { present: 5, counted: 7 });
        assert_eq!(total.percentage(), 71.43);

        let averaged = (weeks[0].percentage() + weeks[1].percentage()) / 2.0;
        assert_eq!(averaged, 75.0);
        assert!((total.percentage() - averaged).abs() > 1.0);
    }

    #[test]
    fn pooled_equal_weeks() {
        let total = pooled([
            AttendanceTally { present: 2, counted: 4 },
            AttendanceTally { present: 1, counted: 2 },
        ]);
        assert_eq!(total, AttendanceTally { present: 3, counted: 6 });
        assert_eq!(total.percentage(), 50.0);
    }

    #[test]
    fn subject_attendance_absent_without_marks() {
        let blank = record(Uuid::new_v4(), [None; 4]);
        assert_eq!(subject_attendance([&blank]), None);
        assert_eq!(subject_attendance(std::iter::empty::<&WeeklyRecord>()), None);

        let marked = record(Uuid::new_v4(), [Some(Absent), None, None, None]);
        assert_eq!(subject_attendance([&blank, &marked]), Some(0.0));
    }

    #[test]
    fn parses_week_marks() {
        let marks = parse_week_marks("marks", "P, l,-").unwrap();
        assert_eq!(marks, [Some(Present), Some(Late), None, None]);
        assert_eq!(marks_summary(&marks), "P,L,-,-");

        let err = parse_week_marks("marks", "P,P,P,P,P").unwrap_err();
        assert_eq!(err.field, "marks");
        assert!(parse_week_marks("marks", "P,X").is_err());
    }

    #[test]
    fn breakdown_fills_missing_weeks() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let sessions: Vec<WeeklySession> = (1..=2)
            .rev()
            .map(|week_number| WeeklySession {
                id: Uuid::new_v4(),
                subject_id: Uuid::nil(),
                week_number,
                week_start: date,
                week_end: date,
                sessions_per_week: 4,
            })
            .collect();
        let week_two = &sessions[0];
        let marked = record(week_two.id, [Some(Present), Some(Late), None, None]);

        let rows = week_breakdown(&sessions, &[&marked]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].week_number, 1);
        assert_eq!(rows[0].summary, "-");
        assert_eq!(rows[0].percentage, 0.0);
        assert_eq!(rows[1].summary, "P,L,-,-");
        assert_eq!(rows[1].percentage, 50.0);
    }

    #[test]
    fn marking_requires_enrollment() {
        let marco = Student {
            id: Uuid::new_v4(),
            student_number: 20260004,
            full_name: "Marco Dizon".to_string(),
            grade_level: GradeLevel::new(8).unwrap(),
            section_id: None,
            status: StudentStatus::Active,
        };
        let math = Subject {
            id: Uuid::new_v4(),
            code: "MATH7".to_string(),
            name: "Mathematics 7".to_string(),
            department: "Mathematics".to_string(),
            grade_level: Some(GradeLevel::new(7).unwrap()),
            status: RecordStatus::Active,
        };

        let err = ensure_enrolled(&[Uuid::new_v4()], &marco, &math).unwrap_err();
        assert_eq!(err.field, "student");
        assert_eq!(err.message, "Marco Dizon (#20260004) is not enrolled in MATH7");
        assert!(ensure_enrolled(&[marco.id], &marco, &math).is_ok());
    }
}
