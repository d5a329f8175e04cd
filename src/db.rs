use std::collections::HashSet;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::{PgExecutor, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attendance;
use crate::cohort::Viewer;
use crate::grading::{self, ComponentChange};
use crate::models::{
    AttendanceMark, GradeLevel, GradingComponent, PredictionSource, RecordStatus, ScoreKind,
    ScoreRecord, StoredPrediction, Student, StudentStatus, Subject, WeekMarks, WeeklyRecord,
    WeeklySession,
};
use crate::predict::Prediction;
use crate::validate;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn student_from_row(row: &PgRow) -> anyhow::Result<Student> {
    let status: String = row.try_get("status")?;
    Ok(Student {
        id: row.try_get("id")?,
        student_number: row.try_get("student_number")?,
        full_name: row.try_get("full_name")?,
        grade_level: GradeLevel::new(row.try_get("grade_level")?)?,
        section_id: row.try_get("section_id")?,
        status: status.parse()?,
    })
}

fn subject_from_row(row: &PgRow) -> anyhow::Result<Subject> {
    let status: String = row.try_get("status")?;
    let grade_level: Option<i16> = row.try_get("grade_level")?;
    Ok(Subject {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        department: row.try_get("department")?,
        grade_level: grade_level.map(GradeLevel::new).transpose()?,
        status: status.parse()?,
    })
}

fn component_from_row(row: &PgRow) -> anyhow::Result<GradingComponent> {
    let status: String = row.try_get("status")?;
    Ok(GradingComponent {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        weight: row.try_get("weight")?,
        status: status.parse()?,
    })
}

fn marks_from_row(row: &PgRow) -> anyhow::Result<WeekMarks> {
    let mut marks: WeekMarks = [None; 4];
    for (index, slot) in marks.iter_mut().enumerate() {
        let column = format!("session_{}", index + 1);
        let code: Option<String> = row.try_get(column.as_str())?;
        *slot = match code {
            Some(code) => AttendanceMark::parse_code(&code)?,
            None => None,
        };
    }
    Ok(marks)
}

fn mark_code(mark: Option<AttendanceMark>) -> Option<String> {
    mark.map(|mark| mark.code().to_string())
}

pub async fn fetch_students(
    pool: &PgPool,
    status: Option<StudentStatus>,
) -> anyhow::Result<Vec<Student>> {
    let rows = sqlx::query(
        r#"
        SELECT id, student_number, full_name, grade_level, section_id, status
        FROM edutrack.students
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY full_name
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter().map(student_from_row).collect()
}

pub async fn find_student(pool: &PgPool, student_number: i32) -> anyhow::Result<Student> {
    let row = sqlx::query(
        r#"
        SELECT id, student_number, full_name, grade_level, section_id, status
        FROM edutrack.students
        WHERE student_number = $1
        "#,
    )
    .bind(student_number)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("no student with number {student_number}"))?;

    student_from_row(&row)
}

pub async fn fetch_subjects(pool: &PgPool) -> anyhow::Result<Vec<Subject>> {
    let rows = sqlx::query(
        "SELECT id, code, name, department, grade_level, status FROM edutrack.subjects ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(subject_from_row).collect()
}

pub async fn find_subject(pool: &PgPool, code: &str) -> anyhow::Result<Subject> {
    let row = sqlx::query(
        "SELECT id, code, name, department, grade_level, status FROM edutrack.subjects WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("no subject with code {code}"))?;

    subject_from_row(&row)
}

pub async fn section_label(pool: &PgPool, section_id: Uuid) -> anyhow::Result<Option<String>> {
    let row = sqlx::query("SELECT grade_level, name FROM edutrack.sections WHERE id = $1")
        .bind(section_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let level = GradeLevel::new(row.try_get("grade_level")?)?;
            let name: String = row.try_get("name")?;
            Ok(Some(format!("{level} {name}")))
        }
        None => Ok(None),
    }
}

pub async fn active_school_year(pool: &PgPool) -> anyhow::Result<Option<String>> {
    let row = sqlx::query(
        "SELECT year_label FROM edutrack.school_years WHERE status = 'Active' ORDER BY year_label DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| row.get("year_label")))
}

pub async fn fetch_faculty_subjects(pool: &PgPool, email: &str) -> anyhow::Result<HashSet<Uuid>> {
    let rows = sqlx::query(
        r#"
        SELECT subject_id
        FROM edutrack.faculty_assignments
        WHERE faculty_email = $1 AND status = 'Active'
        "#,
    )
    .bind(email)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        warn!(email, "faculty member has no active subject assignments");
    }
    Ok(rows.iter().map(|row| row.get("subject_id")).collect())
}

pub async fn fetch_scores(
    pool: &PgPool,
    student_id: Option<Uuid>,
    subject_id: Option<Uuid>,
) -> anyhow::Result<Vec<ScoreRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT student_id, subject_id, kind, sequence, score
        FROM edutrack.scores
        WHERE ($1::uuid IS NULL OR student_id = $1)
          AND ($2::uuid IS NULL OR subject_id = $2)
        ORDER BY kind, sequence
        "#,
    )
    .bind(student_id)
    .bind(subject_id)
    .fetch_all(pool)
    .await?;

    let mut scores = Vec::new();
    for row in rows {
        let kind: String = row.try_get("kind")?;
        scores.push(ScoreRecord {
            student_id: row.try_get("student_id")?,
            subject_id: row.try_get("subject_id")?,
            kind: kind.parse()?,
            sequence: row.try_get("sequence")?,
            score: row.try_get("score")?,
        });
    }
    Ok(scores)
}

pub async fn upsert_score<'e, E>(executor: E, score: &ScoreRecord) -> anyhow::Result<()>
where
    E: PgExecutor<'e>,
{
    validate::check_score("score", score.score)?;
    validate::check_sequence("sequence", score.sequence)?;

    sqlx::query(
        r#"
        INSERT INTO edutrack.scores (student_id, subject_id, kind, sequence, score)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id, subject_id, kind, sequence) DO UPDATE
        SET score = EXCLUDED.score, recorded_at = now()
        "#,
    )
    .bind(score.student_id)
    .bind(score.subject_id)
    .bind(score.kind.as_str())
    .bind(score.sequence)
    .bind(score.score)
    .execute(executor)
    .await?;
    Ok(())
}

/// The sequence number a newly added score of `kind` takes in a subject.
pub async fn next_sequence(pool: &PgPool, subject_id: Uuid, kind: ScoreKind) -> anyhow::Result<i32> {
    let row = sqlx::query(
        "SELECT COALESCE(MAX(sequence), 0) AS last FROM edutrack.scores WHERE subject_id = $1 AND kind = $2",
    )
    .bind(subject_id)
    .bind(kind.as_str())
    .fetch_one(pool)
    .await?;

    let last: i32 = row.try_get("last")?;
    Ok(last + 1)
}

pub async fn import_scores_csv(
    pool: &PgPool,
    viewer: &Viewer,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let imported = import_scores(pool, viewer, file).await?;
    info!(rows = imported, path = %csv_path.display(), "imported scores");
    Ok(imported)
}

/// Imports score rows from CSV. Every row is validated, resolved and checked
/// against the viewer's subjects before anything is written, and all writes
/// share one transaction.
pub async fn import_scores<R: std::io::Read>(
    pool: &PgPool,
    viewer: &Viewer,
    input: R,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_number: i32,
        subject_code: String,
        kind: String,
        sequence: i32,
        score: String,
    }

    let mut reader = csv::Reader::from_reader(input);
    let mut pending = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed row on line {line}"))?;
        let score = validate::parse_score(&format!("line {line} score"), &row.score)?;
        let sequence = validate::check_sequence(&format!("line {line} sequence"), row.sequence)?;
        let kind: ScoreKind = row
            .kind
            .parse()
            .with_context(|| format!("line {line} kind"))?;
        let student = find_student(pool, row.student_number)
            .await
            .with_context(|| format!("line {line}"))?;
        let subject = find_subject(pool, &row.subject_code)
            .await
            .with_context(|| format!("line {line}"))?;
        viewer
            .require_edit(&subject)
            .with_context(|| format!("line {line}"))?;

        pending.push(ScoreRecord {
            student_id: student.id,
            subject_id: subject.id,
            kind,
            sequence,
            score,
        });
    }

    let mut tx = pool.begin().await?;
    for score in pending.iter() {
        upsert_score(&mut *tx, score).await?;
    }
    tx.commit().await?;
    Ok(pending.len())
}

pub async fn fetch_sessions(pool: &PgPool, subject_id: Option<Uuid>) -> anyhow::Result<Vec<WeeklySession>> {
    let rows = sqlx::query(
        r#"
        SELECT id, subject_id, week_number, week_start, week_end, sessions_per_week
        FROM edutrack.attendance_sessions
        WHERE ($1::uuid IS NULL OR subject_id = $1)
        ORDER BY subject_id, week_number
        "#,
    )
    .bind(subject_id)
    .fetch_all(pool)
    .await?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(WeeklySession {
            id: row.try_get("id")?,
            subject_id: row.try_get("subject_id")?,
            week_number: row.try_get("week_number")?,
            week_start: row.try_get("week_start")?,
            week_end: row.try_get("week_end")?,
            sessions_per_week: row.try_get("sessions_per_week")?,
        });
    }
    Ok(sessions)
}

pub async fn fetch_attendance_records(
    pool: &PgPool,
    student_id: Option<Uuid>,
    subject_id: Option<Uuid>,
) -> anyhow::Result<Vec<WeeklyRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT r.session_id, s.subject_id, r.student_id,
               r.session_1, r.session_2, r.session_3, r.session_4
        FROM edutrack.attendance_records r
        JOIN edutrack.attendance_sessions s ON s.id = r.session_id
        WHERE ($1::uuid IS NULL OR r.student_id = $1)
          AND ($2::uuid IS NULL OR s.subject_id = $2)
        ORDER BY s.week_number
        "#,
    )
    .bind(student_id)
    .bind(subject_id)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::new();
    for row in rows {
        records.push(WeeklyRecord {
            session_id: row.try_get("session_id")?,
            subject_id: row.try_get("subject_id")?,
            student_id: row.try_get("student_id")?,
            marks: marks_from_row(&row)?,
        });
    }
    Ok(records)
}

/// Active students enrolled in a subject through its active grade-level
/// assignments, or every active student when the subject has none.
pub async fn enrolled_students<'e, E>(executor: E, subject_id: Uuid) -> anyhow::Result<Vec<Uuid>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        SELECT st.id
        FROM edutrack.students st
        WHERE st.status = 'active'
          AND (
            NOT EXISTS (
                SELECT 1 FROM edutrack.subject_assignments a
                WHERE a.subject_id = $1 AND a.status = 'Active'
            )
            OR st.grade_level IN (
                SELECT a.grade_level FROM edutrack.subject_assignments a
                WHERE a.subject_id = $1 AND a.status = 'Active'
            )
          )
        ORDER BY st.full_name
        "#,
    )
    .bind(subject_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.iter().map(|row| row.get("id")).collect())
}

/// Get-or-create on (subject, week). A newly created week gets an unmarked
/// record for every enrolled student in the same transaction.
pub async fn create_session(
    pool: &PgPool,
    subject_id: Uuid,
    week_number: i32,
    week_start: NaiveDate,
    week_end: NaiveDate,
    sessions_per_week: i16,
) -> anyhow::Result<(Uuid, bool)> {
    if week_end < week_start {
        anyhow::bail!("week end {week_end} is before week start {week_start}");
    }

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO edutrack.attendance_sessions
        (id, subject_id, week_number, week_start, week_end, sessions_per_week)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (subject_id, week_number) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(subject_id)
    .bind(week_number)
    .bind(week_start)
    .bind(week_end)
    .bind(sessions_per_week)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = inserted {
        let session_id: Uuid = row.get("id");
        let students = enrolled_students(&mut *tx, subject_id).await?;
        for student_id in students.iter() {
            sqlx::query(
                r#"
                INSERT INTO edutrack.attendance_records (session_id, student_id)
                VALUES ($1, $2)
                ON CONFLICT (session_id, student_id) DO NOTHING
                "#,
            )
            .bind(session_id)
            .bind(*student_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(week_number, students = students.len(), "created attendance week");
        return Ok((session_id, true));
    }

    let existing: Uuid = sqlx::query(
        "SELECT id FROM edutrack.attendance_sessions WHERE subject_id = $1 AND week_number = $2",
    )
    .bind(subject_id)
    .bind(week_number)
    .fetch_one(&mut *tx)
    .await?
    .get("id");
    tx.commit().await?;
    Ok((existing, false))
}

pub async fn find_session(pool: &PgPool, subject_id: Uuid, week_number: i32) -> anyhow::Result<Uuid> {
    let row = sqlx::query(
        "SELECT id FROM edutrack.attendance_sessions WHERE subject_id = $1 AND week_number = $2",
    )
    .bind(subject_id)
    .bind(week_number)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("week {week_number} has no attendance session"))?;

    Ok(row.get("id"))
}

pub async fn upsert_attendance(
    pool: &PgPool,
    session_id: Uuid,
    student_id: Uuid,
    marks: &WeekMarks,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO edutrack.attendance_records
        (session_id, student_id, session_1, session_2, session_3, session_4)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (session_id, student_id) DO UPDATE
        SET session_1 = EXCLUDED.session_1,
            session_2 = EXCLUDED.session_2,
            session_3 = EXCLUDED.session_3,
            session_4 = EXCLUDED.session_4
        "#,
    )
    .bind(session_id)
    .bind(student_id)
    .bind(mark_code(marks[0]))
    .bind(mark_code(marks[1]))
    .bind(mark_code(marks[2]))
    .bind(mark_code(marks[3]))
    .execute(pool)
    .await?;
    Ok(())
}

/// Marks one enrolled student's week in a subject.
pub async fn record_attendance(
    pool: &PgPool,
    subject: &Subject,
    week_number: i32,
    student: &Student,
    marks: &WeekMarks,
) -> anyhow::Result<()> {
    let session_id = find_session(pool, subject.id, week_number).await?;
    let enrolled = enrolled_students(pool, subject.id).await?;
    attendance::ensure_enrolled(&enrolled, student, subject)?;
    upsert_attendance(pool, session_id, student.id, marks).await
}

pub async fn fetch_grading_components<'e, E>(executor: E) -> anyhow::Result<Vec<GradingComponent>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        "SELECT id, name, weight, status FROM edutrack.grading_components ORDER BY name",
    )
    .fetch_all(executor)
    .await?;

    rows.iter().map(component_from_row).collect()
}

/// Adds or edits a component under a table lock so the active-total check
/// and the write see the same rows. Returns the new active total.
pub async fn save_grading_component(pool: &PgPool, change: &ComponentChange) -> anyhow::Result<f64> {
    let mut tx = pool.begin().await?;
    sqlx::query("LOCK TABLE edutrack.grading_components IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut *tx)
        .await?;

    let components = fetch_grading_components(&mut *tx).await?;
    let total = grading::check_change(&components, change)?;

    match change.id {
        Some(id) => {
            let result = sqlx::query(
                "UPDATE edutrack.grading_components SET name = $2, weight = $3, status = $4 WHERE id = $1",
            )
            .bind(id)
            .bind(change.name.trim())
            .bind(change.weight)
            .bind(change.status.as_str())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                anyhow::bail!("no grading component with id {id}");
            }
        }
        None => {
            sqlx::query(
                "INSERT INTO edutrack.grading_components (id, name, weight, status) VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(change.name.trim())
            .bind(change.weight)
            .bind(change.status.as_str())
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    debug!(total, "grading components saved");
    Ok(total)
}

pub async fn delete_grading_component(pool: &PgPool, id: Uuid) -> anyhow::Result<()> {
    let result = sqlx::query("DELETE FROM edutrack.grading_components WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        anyhow::bail!("no grading component with id {id}");
    }
    Ok(())
}

pub async fn save_prediction(
    pool: &PgPool,
    student_id: Uuid,
    subject_id: Uuid,
    prediction: &Prediction,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO edutrack.predictions
        (student_id, subject_id, predicted_grade, category, source, computed_at)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (student_id, subject_id) DO UPDATE
        SET predicted_grade = EXCLUDED.predicted_grade,
            category = EXCLUDED.category,
            source = EXCLUDED.source,
            computed_at = EXCLUDED.computed_at
        "#,
    )
    .bind(student_id)
    .bind(subject_id)
    .bind(prediction.predicted_grade)
    .bind(prediction.category.label())
    .bind(prediction.source.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_predictions(pool: &PgPool, student_id: Uuid) -> anyhow::Result<Vec<StoredPrediction>> {
    let rows = sqlx::query(
        r#"
        SELECT subject_id, predicted_grade, category, source, computed_at
        FROM edutrack.predictions
        WHERE student_id = $1
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut predictions = Vec::new();
    for row in rows {
        let source: String = row.try_get("source")?;
        predictions.push(StoredPrediction {
            subject_id: row.try_get("subject_id")?,
            predicted_grade: row.try_get("predicted_grade")?,
            category: row.try_get("category")?,
            source: source.parse::<PredictionSource>()?,
            computed_at: row.try_get("computed_at")?,
        });
    }
    Ok(predictions)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResetCounts {
    pub scores: u64,
    pub attendance_records: u64,
    pub predictions: u64,
}

/// Removes every score, attendance record and cached prediction of one
/// student in one subject.
pub async fn reset_student_subject(
    pool: &PgPool,
    student_id: Uuid,
    subject_id: Uuid,
) -> anyhow::Result<ResetCounts> {
    let mut tx = pool.begin().await?;

    let scores = sqlx::query("DELETE FROM edutrack.scores WHERE student_id = $1 AND subject_id = $2")
        .bind(student_id)
        .bind(subject_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let attendance_records = sqlx::query(
        r#"
        DELETE FROM edutrack.attendance_records r
        USING edutrack.attendance_sessions s
        WHERE r.session_id = s.id AND r.student_id = $1 AND s.subject_id = $2
        "#,
    )
    .bind(student_id)
    .bind(subject_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let predictions =
        sqlx::query("DELETE FROM edutrack.predictions WHERE student_id = $1 AND subject_id = $2")
            .bind(student_id)
            .bind(subject_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

    tx.commit().await?;
    Ok(ResetCounts {
        scores,
        attendance_records,
        predictions,
    })
}

#[derive(Debug, Clone, Copy)]
pub enum ClearScope {
    Orphans,
    All,
    Subject { subject_id: Uuid, week: Option<i32> },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearCounts {
    pub sessions: i64,
    pub records: i64,
}

fn scope_filter(scope: ClearScope) -> (Option<Uuid>, Option<i32>) {
    match scope {
        ClearScope::Subject { subject_id, week } => (Some(subject_id), week),
        ClearScope::All | ClearScope::Orphans => (None, None),
    }
}

/// Counts what a clear would remove, or removes it when `confirm` is set.
/// A confirmed clear reports the rows its deletes actually removed.
pub async fn clear_attendance(
    pool: &PgPool,
    scope: ClearScope,
    confirm: bool,
) -> anyhow::Result<ClearCounts> {
    let mut tx = pool.begin().await?;

    if let ClearScope::Orphans = scope {
        let sessions: i64 = if confirm {
            sqlx::query(
                r#"
                DELETE FROM edutrack.attendance_sessions s
                WHERE NOT EXISTS (
                    SELECT 1 FROM edutrack.attendance_records r WHERE r.session_id = s.id
                )
                "#,
            )
            .execute(&mut *tx)
            .await?
            .rows_affected() as i64
        } else {
            sqlx::query(
                r#"
                SELECT COUNT(*) AS total FROM edutrack.attendance_sessions s
                WHERE NOT EXISTS (
                    SELECT 1 FROM edutrack.attendance_records r WHERE r.session_id = s.id
                )
                "#,
            )
            .fetch_one(&mut *tx)
            .await?
            .try_get("total")?
        };
        tx.commit().await?;
        return Ok(ClearCounts {
            sessions,
            records: 0,
        });
    }

    let (subject_id, week) = scope_filter(scope);
    if !confirm {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM edutrack.attendance_sessions s
                 WHERE ($1::uuid IS NULL OR s.subject_id = $1)
                   AND ($2::int IS NULL OR s.week_number = $2)) AS sessions,
                (SELECT COUNT(*) FROM edutrack.attendance_records r
                 JOIN edutrack.attendance_sessions s ON s.id = r.session_id
                 WHERE ($1::uuid IS NULL OR s.subject_id = $1)
                   AND ($2::int IS NULL OR s.week_number = $2)) AS records
            "#,
        )
        .bind(subject_id)
        .bind(week)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        return Ok(ClearCounts {
            sessions: row.try_get("sessions")?,
            records: row.try_get("records")?,
        });
    }

    let records = sqlx::query(
        r#"
        DELETE FROM edutrack.attendance_records r
        USING edutrack.attendance_sessions s
        WHERE r.session_id = s.id
          AND ($1::uuid IS NULL OR s.subject_id = $1)
          AND ($2::int IS NULL OR s.week_number = $2)
        "#,
    )
    .bind(subject_id)
    .bind(week)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    let sessions = sqlx::query(
        r#"
        DELETE FROM edutrack.attendance_sessions s
        WHERE ($1::uuid IS NULL OR s.subject_id = $1)
          AND ($2::int IS NULL OR s.week_number = $2)
        "#,
    )
    .bind(subject_id)
    .bind(week)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    info!(sessions, records, "cleared attendance");
    Ok(ClearCounts {
        sessions: sessions as i64,
        records: records as i64,
    })
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO edutrack.school_years (id, year_label, status)
        VALUES ($1, '2025-2026', 'Active')
        ON CONFLICT (year_label) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .execute(pool)
    .await?;

    let sections = vec![(7, "Sampaguita", "Ms. Reyes"), (8, "Narra", "Mr. Santos")];
    let mut section_ids = Vec::new();
    for (grade_level, name, adviser) in sections {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO edutrack.sections (id, grade_level, name, adviser, status)
            VALUES ($1, $2, $3, $4, 'Active')
            ON CONFLICT (grade_level, name) DO UPDATE SET adviser = EXCLUDED.adviser
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(grade_level as i16)
        .bind(name)
        .bind(adviser)
        .fetch_one(pool)
        .await?
        .get("id");
        section_ids.push((grade_level as i16, id));
    }

    let students = vec![
        (20260001, "Avery Lee", 7),
        (20260002, "Jules Moreno", 7),
        (20260003, "Kiara Patel", 7),
        (20260004, "Marco Dizon", 8),
    ];
    let mut student_ids = Vec::new();
    for (number, name, grade_level) in students {
        let section_id = section_ids
            .iter()
            .find(|(level, _)| *level == grade_level)
            .map(|(_, id)| *id);
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO edutrack.students (id, student_number, full_name, grade_level, section_id, status)
            VALUES ($1, $2, $3, $4, $5, 'active')
            ON CONFLICT (student_number) DO UPDATE
            SET full_name = EXCLUDED.full_name, grade_level = EXCLUDED.grade_level,
                section_id = EXCLUDED.section_id
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(number)
        .bind(name)
        .bind(grade_level as i16)
        .bind(section_id)
        .fetch_one(pool)
        .await?
        .get("id");
        student_ids.push(id);
    }

    let subjects = vec![
        ("MATH7", "Mathematics 7", "Mathematics", 7),
        ("SCI7", "Science 7", "Science", 7),
        ("ENG8", "English 8", "Languages", 8),
    ];
    let mut subject_ids = Vec::new();
    for (code, name, department, grade_level) in subjects {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO edutrack.subjects (id, code, name, department, grade_level, status)
            VALUES ($1, $2, $3, $4, $5, 'Active')
            ON CONFLICT (code) DO UPDATE
            SET name = EXCLUDED.name, department = EXCLUDED.department
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(department)
        .bind(grade_level as i16)
        .fetch_one(pool)
        .await?
        .get("id");

        sqlx::query(
            r#"
            INSERT INTO edutrack.subject_assignments (id, grade_level, subject_id, status)
            VALUES ($1, $2, $3, 'Active')
            ON CONFLICT (grade_level, subject_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(grade_level as i16)
        .bind(id)
        .execute(pool)
        .await?;
        subject_ids.push(id);
    }

    sqlx::query(
        r#"
        INSERT INTO edutrack.faculty_assignments (faculty_email, subject_id, status)
        VALUES ($1, $2, 'Active'), ($1, $3, 'Active')
        ON CONFLICT (faculty_email, subject_id) DO NOTHING
        "#,
    )
    .bind("l.santos@edutrack.school")
    .bind(subject_ids[0])
    .bind(subject_ids[1])
    .execute(pool)
    .await?;

    if fetch_grading_components(pool).await?.is_empty() {
        for (name, weight) in [("Quiz", 25.0), ("Exam", 30.0), ("Project", 25.0), ("Attendance", 20.0)] {
            save_grading_component(
                pool,
                &ComponentChange {
                    id: None,
                    name: name.to_string(),
                    weight,
                    status: RecordStatus::Active,
                },
            )
            .await?;
        }
    }

    let scores = vec![
        (0, 0, ScoreKind::Quiz, 1, 94.0),
        (0, 0, ScoreKind::Quiz, 2, 90.0),
        (0, 0, ScoreKind::Exam, 1, 92.0),
        (0, 1, ScoreKind::Project, 1, 88.0),
        (1, 0, ScoreKind::Quiz, 1, 62.0),
        (1, 0, ScoreKind::Exam, 1, 58.0),
        (1, 1, ScoreKind::Quiz, 1, 85.0),
        (2, 0, ScoreKind::Quiz, 1, 78.0),
        (2, 1, ScoreKind::Exam, 1, 81.0),
        (3, 2, ScoreKind::Quiz, 1, 91.0),
    ];
    for (student, subject, kind, sequence, score) in scores {
        upsert_score(
            pool,
            &ScoreRecord {
                student_id: student_ids[student],
                subject_id: subject_ids[subject],
                kind,
                sequence,
                score,
            },
        )
        .await?;
    }

    let monday = NaiveDate::from_ymd_opt(2026, 1, 5).context("invalid date")?;
    let friday = NaiveDate::from_ymd_opt(2026, 1, 9).context("invalid date")?;
    let (session_id, _) = create_session(pool, subject_ids[0], 1, monday, friday, 4).await?;
    let week_marks = ["P,P,P,P", "P,A,A,L", "P,P,L,-"];
    for (student_id, marks) in student_ids.iter().zip(week_marks) {
        let parsed = attendance::parse_week_marks("marks", marks)?;
        upsert_attendance(pool, session_id, *student_id, &parsed).await?;
    }

    Ok(())
}

// Run against a scratch Postgres: DATABASE_URL=... cargo test -- --ignored
#[cfg(test)]
mod tests {
    use super::*;

    async fn count(pool: &PgPool, sql: &str, id: Uuid) -> anyhow::Result<i64> {
        Ok(sqlx::query(sql).bind(id).fetch_one(pool).await?.try_get("total")?)
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn new_week_gets_records_for_enrolled_students(pool: PgPool) -> anyhow::Result<()> {
        seed(&pool).await?;
        let math = find_subject(&pool, "MATH7").await?;
        let monday = NaiveDate::from_ymd_opt(2026, 1, 12).context("invalid date")?;
        let friday = NaiveDate::from_ymd_opt(2026, 1, 16).context("invalid date")?;

        let (session_id, created) = create_session(&pool, math.id, 2, monday, friday, 4).await?;
        assert!(created);
        let records = count(
            &pool,
            "SELECT COUNT(*) AS total FROM edutrack.attendance_records WHERE session_id = $1",
            session_id,
        )
        .await?;
        assert_eq!(records, 3);

        let (again, created) = create_session(&pool, math.id, 2, monday, friday, 4).await?;
        assert_eq!(again, session_id);
        assert!(!created);
        Ok(())
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn attendance_rejects_students_outside_subject(pool: PgPool) -> anyhow::Result<()> {
        seed(&pool).await?;
        let math = find_subject(&pool, "MATH7").await?;
        let marco = find_student(&pool, 20260004).await?;
        let marks = attendance::parse_week_marks("marks", "P,P,P,P")?;

        let err = record_attendance(&pool, &math, 1, &marco, &marks)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is not enrolled in MATH7"));
        let records = count(
            &pool,
            "SELECT COUNT(*) AS total FROM edutrack.attendance_records WHERE student_id = $1",
            marco.id,
        )
        .await?;
        assert_eq!(records, 0);

        let avery = find_student(&pool, 20260001).await?;
        record_attendance(&pool, &math, 1, &avery, &marks).await?;
        Ok(())
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn faculty_import_outside_assignments_writes_nothing(pool: PgPool) -> anyhow::Result<()> {
        seed(&pool).await?;
        let viewer = Viewer::Faculty {
            subject_ids: fetch_faculty_subjects(&pool, "l.santos@edutrack.school").await?,
        };
        let marco = find_student(&pool, 20260004).await?;
        let csv = "student_number,subject_code,kind,sequence,score\n\
                   20260001,MATH7,quiz,5,88\n\
                   20260004,ENG8,quiz,5,70\n";

        let err = import_scores(&pool, &viewer, csv.as_bytes()).await.unwrap_err();
        assert!(format!("{err:#}").contains("not permitted to modify records for ENG8"));
        let quiz_five = count(
            &pool,
            "SELECT COUNT(*) AS total FROM edutrack.scores WHERE student_id = $1 AND sequence = 5",
            marco.id,
        )
        .await?;
        assert_eq!(quiz_five, 0);

        let allowed = "student_number,subject_code,kind,sequence,score\n20260001,MATH7,quiz,5,88\n";
        assert_eq!(import_scores(&pool, &viewer, allowed.as_bytes()).await?, 1);
        Ok(())
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn orphan_clear_reports_removed_weeks(pool: PgPool) -> anyhow::Result<()> {
        seed(&pool).await?;
        let english = find_subject(&pool, "ENG8").await?;
        let monday = NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?;
        sqlx::query(
            r#"
            INSERT INTO edutrack.attendance_sessions
            (id, subject_id, week_number, week_start, week_end, sessions_per_week)
            VALUES ($1, $2, 9, $3, $3, 4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(english.id)
        .bind(monday)
        .execute(&pool)
        .await?;

        let dry_run = clear_attendance(&pool, ClearScope::Orphans, false).await?;
        assert_eq!(dry_run.sessions, 1);
        let removed = clear_attendance(&pool, ClearScope::Orphans, true).await?;
        assert_eq!(removed.sessions, 1);
        let after = clear_attendance(&pool, ClearScope::Orphans, false).await?;
        assert_eq!(after.sessions, 0);
        Ok(())
    }
}
