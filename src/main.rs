use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

mod attendance;
mod cohort;
mod config;
mod db;
mod error;
mod grades;
mod grading;
mod models;
mod predict;
mod report;
mod telemetry;
mod validate;

use cohort::Viewer;
use error::PredictError;
use grades::SubjectGrade;
use grading::{ComponentChange, WeightStatus};
use models::{RecordStatus, ScoreKind, ScoreRecord, Student, StudentStatus, Subject};
use predict::{CategoryWeights, Predictor};

#[derive(Parser)]
#[command(name = "edutrack-grades")]
#[command(about = "School grade, attendance and at-risk tracking", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: config::Config,

    /// Act as a faculty member, limited to their assigned subjects
    #[arg(long, global = true, conflicts_with = "as_student")]
    as_faculty: Option<String>,

    /// Act as a student, limited to their own records
    #[arg(long, global = true)]
    as_student: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import scores from a CSV file (student_number,subject_code,kind,sequence,score)
    ImportScores {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record or overwrite one quiz, exam or project score
    RecordScore {
        #[arg(long)]
        student: i32,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        kind: String,
        /// Defaults to the next unused number for this subject
        #[arg(long)]
        sequence: Option<i32>,
        #[arg(long)]
        score: String,
    },
    /// Open an attendance week for a subject
    AddSession {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        week: i32,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, default_value_t = 4)]
        sessions_per_week: i16,
    },
    /// Set a student's marks for one week, e.g. P,P,L,-
    MarkAttendance {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        week: i32,
        #[arg(long)]
        student: i32,
        #[arg(long)]
        marks: String,
    },
    /// Show a student's averages, grade and category per subject
    Grades {
        #[arg(long)]
        student: i32,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show the weekly attendance sheet of a subject
    Attendance {
        #[arg(long)]
        subject: String,
    },
    /// Grade distribution across active students
    Dashboard,
    /// List student-subject pairs graded below 70
    AtRisk {
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Predict and cache a student's grade in a subject
    Predict {
        #[arg(long)]
        student: i32,
        #[arg(long)]
        subject: String,
    },
    /// Maintain grading components and their weights
    Grading {
        #[command(subcommand)]
        action: GradingAction,
    },
    /// Delete all scores and attendance of a student in a subject
    ResetScores {
        #[arg(long)]
        student: i32,
        #[arg(long)]
        subject: String,
    },
    /// Remove attendance weeks and records
    #[command(group(
        ArgGroup::new("target")
            .args(["orphan", "all", "subject"])
            .required(true)
            .multiple(false)
    ))]
    ClearAttendance {
        /// Weeks that have no attendance records
        #[arg(long)]
        orphan: bool,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, requires = "subject")]
        week: Option<i32>,
        /// Perform the deletion instead of reporting counts
        #[arg(long)]
        yes: bool,
    },
    /// Generate a markdown grade report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Generate a markdown report card for one student
    ReportCard {
        #[arg(long)]
        student: i32,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum GradingAction {
    /// List components and the active weight total
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        weight: f64,
        #[arg(long, default_value = "Active")]
        status: String,
    },
    Edit {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        weight: f64,
        #[arg(long)]
        status: String,
    },
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

async fn resolve_viewer(pool: &PgPool, cli: &Cli) -> anyhow::Result<Viewer> {
    if let Some(email) = cli.as_faculty.as_deref() {
        let subject_ids = db::fetch_faculty_subjects(pool, email).await?;
        return Ok(Viewer::Faculty { subject_ids });
    }
    if let Some(number) = cli.as_student {
        let student = db::find_student(pool, number).await?;
        return Ok(Viewer::Student {
            student_id: student.id,
        });
    }
    Ok(Viewer::Admin)
}

struct Gradebook {
    students: Vec<Student>,
    subjects: Vec<Subject>,
    grades: Vec<SubjectGrade>,
}

async fn load_gradebook(pool: &PgPool, viewer: &Viewer) -> anyhow::Result<Gradebook> {
    let students = db::fetch_students(pool, Some(StudentStatus::Active)).await?;
    let subjects = db::fetch_subjects(pool).await?;
    let scores = db::fetch_scores(pool, None, None).await?;
    let records = db::fetch_attendance_records(pool, None, None).await?;
    let grades = viewer.scope(grades::build_gradebook(
        &students, &subjects, &scores, &records,
    ));
    Ok(Gradebook {
        students,
        subjects,
        grades,
    })
}

async fn student_grades(
    pool: &PgPool,
    student: &Student,
    subjects: &[Subject],
) -> anyhow::Result<Vec<SubjectGrade>> {
    let scores = db::fetch_scores(pool, Some(student.id), None).await?;
    let records = db::fetch_attendance_records(pool, Some(student.id), None).await?;
    Ok(grades::build_gradebook(
        std::slice::from_ref(student),
        subjects,
        &scores,
        &records,
    ))
}

fn fmt_optional(value: Option<f64>) -> String {
    value
        .map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

fn print_grade(subject: &Subject, grade: &SubjectGrade) {
    println!(
        "- {} ({}): quiz {}, exam {}, project {}, attendance {} => grade {} [{}]",
        subject.name,
        subject.code,
        fmt_optional(grade.quiz_average),
        fmt_optional(grade.exam_average),
        fmt_optional(grade.project_average),
        fmt_optional(grade.attendance_average),
        fmt_optional(grade.overall_grade),
        grade
            .category
            .map(|category| category.label())
            .unwrap_or("no data")
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_tracing(env!("CARGO_CRATE_NAME"), &cli.config.log_level);

    let database_url = cli
        .config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.config.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    // The schema may not exist yet, so init-db skips role lookup.
    let viewer = match &cli.command {
        Commands::InitDb => Viewer::Admin,
        _ => resolve_viewer(&pool, &cli).await?,
    };

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            viewer.require_admin("seeding")?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportScores { csv } => {
            viewer.require_staff()?;
            let inserted = db::import_scores_csv(&pool, &viewer, &csv).await?;
            println!("Imported {inserted} scores from {}.", csv.display());
        }
        Commands::RecordScore {
            student,
            subject,
            kind,
            sequence,
            score,
        } => {
            let student = db::find_student(&pool, student).await?;
            let subject = db::find_subject(&pool, &subject).await?;
            viewer.require_edit(&subject)?;

            let kind: ScoreKind = kind.parse()?;
            let score = validate::parse_score("score", &score)?;
            let sequence = match sequence {
                Some(sequence) => validate::check_sequence("sequence", sequence)?,
                None => db::next_sequence(&pool, subject.id, kind).await?,
            };

            db::upsert_score(
                &pool,
                &ScoreRecord {
                    student_id: student.id,
                    subject_id: subject.id,
                    kind,
                    sequence,
                    score,
                },
            )
            .await?;
            println!(
                "Recorded {kind} {sequence} for {} in {}: {score:.2}",
                student.full_name, subject.name
            );
        }
        Commands::AddSession {
            subject,
            week,
            start,
            end,
            sessions_per_week,
        } => {
            let subject = db::find_subject(&pool, &subject).await?;
            viewer.require_edit(&subject)?;
            let (_, created) =
                db::create_session(&pool, subject.id, week, start, end, sessions_per_week).await?;
            if created {
                println!("Week {week} attendance session created for {}.", subject.name);
            } else {
                println!("Week {week} attendance session already exists for {}.", subject.name);
            }
        }
        Commands::MarkAttendance {
            subject,
            week,
            student,
            marks,
        } => {
            let subject = db::find_subject(&pool, &subject).await?;
            viewer.require_edit(&subject)?;
            let student = db::find_student(&pool, student).await?;
            let marks = attendance::parse_week_marks("marks", &marks)?;

            db::record_attendance(&pool, &subject, week, &student, &marks).await?;
            let tally = attendance::week_tally(&marks);
            println!(
                "Week {week} for {}: {} ({:.2}%)",
                student.full_name,
                attendance::marks_summary(&marks),
                tally.percentage()
            );
        }
        Commands::Grades {
            student,
            subject,
            json,
        } => {
            let student = db::find_student(&pool, student).await?;
            let subjects = match subject.as_deref() {
                Some(code) => vec![db::find_subject(&pool, code).await?],
                None => db::fetch_subjects(&pool).await?,
            };

            let grades = if subject.is_some() {
                let scores = db::fetch_scores(&pool, Some(student.id), Some(subjects[0].id)).await?;
                let records =
                    db::fetch_attendance_records(&pool, Some(student.id), Some(subjects[0].id))
                        .await?;
                vec![grades::grade_for(
                    student.id,
                    subjects[0].id,
                    &scores,
                    &records,
                )]
            } else {
                student_grades(&pool, &student, &subjects).await?
            };
            let grades = viewer.scope(grades);

            if json {
                println!("{}", serde_json::to_string_pretty(&grades)?);
                return Ok(());
            }
            if grades.is_empty() {
                println!("No grades recorded for {}.", student.full_name);
                return Ok(());
            }

            println!("Grades for {} (#{}):", student.full_name, student.student_number);
            for grade in grades.iter() {
                if let Some(subject) = subjects.iter().find(|s| s.id == grade.subject_id) {
                    print_grade(subject, grade);
                }
            }
        }
        Commands::Attendance { subject } => {
            viewer.require_staff()?;
            let subject = db::find_subject(&pool, &subject).await?;
            viewer.require_class_view(&subject)?;
            let sessions = db::fetch_sessions(&pool, Some(subject.id)).await?;
            if sessions.is_empty() {
                println!("No attendance weeks recorded for {}.", subject.name);
                return Ok(());
            }
            let records = db::fetch_attendance_records(&pool, None, Some(subject.id)).await?;
            let enrolled = db::enrolled_students(&pool, subject.id).await?;
            let students = db::fetch_students(&pool, Some(StudentStatus::Active)).await?;

            println!(
                "Attendance for {} ({}, {}):",
                subject.name,
                subject.department,
                subject
                    .grade_level
                    .map(|level| level.to_string())
                    .unwrap_or_else(|| "all grades".to_string())
            );
            for session in sessions.iter() {
                println!(
                    "  W{}: {} to {}, {} sessions",
                    session.week_number, session.week_start, session.week_end, session.sessions_per_week
                );
            }
            for student in students.iter().filter(|s| enrolled.contains(&s.id)) {
                let own: Vec<&models::WeeklyRecord> = records
                    .iter()
                    .filter(|record| record.student_id == student.id)
                    .collect();
                let weeks = attendance::week_breakdown(&sessions, &own);
                let overall = attendance::pooled(
                    own.iter().map(|record| attendance::week_tally(&record.marks)),
                );
                let cells: Vec<String> = weeks
                    .iter()
                    .map(|week| format!("W{} {} ({:.2}%)", week.week_number, week.summary, week.percentage))
                    .collect();
                println!(
                    "- {}: {} | overall {:.2}%",
                    student.full_name,
                    cells.join("; "),
                    overall.percentage()
                );
            }
        }
        Commands::Dashboard => {
            let book = load_gradebook(&pool, &viewer).await?;
            let counts = cohort::distribution(&book.grades, &book.students);
            let at_risk = cohort::at_risk_pairs(&book.grades, &book.students, &book.subjects);

            println!("Grade distribution ({} students graded):", counts.total());
            for category in grades::PerformanceCategory::ALL {
                println!("- {}: {}", category.range_label(), counts.count(category));
            }
            println!("{} student-subject pairs below 70.", at_risk.len());
        }
        Commands::AtRisk { limit } => {
            viewer.require_staff()?;
            let book = load_gradebook(&pool, &viewer).await?;
            let at_risk = cohort::at_risk_pairs(&book.grades, &book.students, &book.subjects);

            if at_risk.is_empty() {
                println!("No students are currently at risk.");
                return Ok(());
            }
            println!("At-risk students (grade below 70):");
            for entry in at_risk.iter().take(limit) {
                println!(
                    "- {} in {} ({}): grade {:.2}",
                    entry.student_name, entry.subject_name, entry.subject_code, entry.overall_grade
                );
            }
        }
        Commands::Predict { student, subject } => {
            viewer.require_staff()?;
            let student = db::find_student(&pool, student).await?;
            let subject = db::find_subject(&pool, &subject).await?;
            viewer.require_edit(&subject)?;
            let scores = db::fetch_scores(&pool, Some(student.id), Some(subject.id)).await?;
            let records =
                db::fetch_attendance_records(&pool, Some(student.id), Some(subject.id)).await?;
            let current = grades::grade_for(student.id, subject.id, &scores, &records);

            let components = db::fetch_grading_components(&pool).await?;
            let predictor = Predictor::new(CategoryWeights::from_components(&components));

            match predictor.predict(&current.averages()) {
                Ok(prediction) => {
                    db::save_prediction(&pool, student.id, subject.id, &prediction).await?;
                    info!(
                        student = student.student_number,
                        subject = %subject.code,
                        source = prediction.source.as_str(),
                        "prediction cached"
                    );
                    println!(
                        "Predicted grade for {} in {}: {:.2} ({})",
                        student.full_name,
                        subject.name,
                        attendance::round2(prediction.predicted_grade),
                        prediction.category
                    );
                }
                Err(PredictError::InsufficientData) => {
                    warn!(student = student.student_number, subject = %subject.code, "prediction skipped");
                    println!(
                        "No scores available for prediction of {} in {}.",
                        student.full_name, subject.name
                    );
                }
            }
        }
        Commands::Grading { action } => {
            viewer.require_admin("managing grading components")?;
            match action {
                GradingAction::List => {
                    let components = db::fetch_grading_components(&pool).await?;
                    for component in components.iter() {
                        println!(
                            "- {} {} {:.2}% [{}]",
                            component.id, component.name, component.weight, component.status
                        );
                    }
                    let total = grading::active_total(&components);
                    println!(
                        "Active total {:.2}% ({})",
                        total,
                        WeightStatus::from_total(total)
                    );
                }
                GradingAction::Add {
                    name,
                    weight,
                    status,
                } => {
                    let change = ComponentChange {
                        id: None,
                        name,
                        weight,
                        status: status.parse::<RecordStatus>()?,
                    };
                    let total = db::save_grading_component(&pool, &change).await?;
                    println!(
                        "Added {}. Active total {:.2}% ({}).",
                        change.name.trim(),
                        total,
                        WeightStatus::from_total(total)
                    );
                }
                GradingAction::Edit {
                    id,
                    name,
                    weight,
                    status,
                } => {
                    let change = ComponentChange {
                        id: Some(id),
                        name,
                        weight,
                        status: status.parse::<RecordStatus>()?,
                    };
                    let total = db::save_grading_component(&pool, &change).await?;
                    println!(
                        "Updated {}. Active total {:.2}% ({}).",
                        change.name.trim(),
                        total,
                        WeightStatus::from_total(total)
                    );
                }
                GradingAction::Delete { id } => {
                    db::delete_grading_component(&pool, id).await?;
                    println!("Grading component deleted.");
                }
            }
        }
        Commands::ResetScores { student, subject } => {
            let student = db::find_student(&pool, student).await?;
            let subject = db::find_subject(&pool, &subject).await?;
            viewer.require_edit(&subject)?;
            let counts = db::reset_student_subject(&pool, student.id, subject.id).await?;
            println!(
                "Deleted {} scores, {} attendance records and {} cached predictions for {} in {}.",
                counts.scores,
                counts.attendance_records,
                counts.predictions,
                student.full_name,
                subject.name
            );
        }
        Commands::ClearAttendance {
            orphan,
            all,
            subject,
            week,
            yes,
        } => {
            viewer.require_admin("clearing attendance")?;
            let scope = if orphan {
                db::ClearScope::Orphans
            } else if all {
                db::ClearScope::All
            } else {
                let code = subject.context("--subject is required")?;
                let subject = db::find_subject(&pool, &code).await?;
                db::ClearScope::Subject {
                    subject_id: subject.id,
                    week,
                }
            };

            let counts = db::clear_attendance(&pool, scope, yes).await?;
            if counts.sessions == 0 && counts.records == 0 {
                println!("Nothing to delete.");
            } else if yes {
                println!(
                    "Deleted {} attendance weeks and {} records.",
                    counts.sessions, counts.records
                );
            } else {
                println!(
                    "Would delete {} attendance weeks and {} records. Run with --yes to delete.",
                    counts.sessions, counts.records
                );
            }
        }
        Commands::Report { out } => {
            viewer.require_staff()?;
            let book = load_gradebook(&pool, &viewer).await?;
            let counts = cohort::distribution(&book.grades, &book.students);
            let at_risk = cohort::at_risk_pairs(&book.grades, &book.students, &book.subjects);
            let visible: Vec<Subject> = book
                .subjects
                .iter()
                .filter(|subject| subject.status.is_active())
                .filter(|subject| match &viewer {
                    Viewer::Faculty { subject_ids } => subject_ids.contains(&subject.id),
                    _ => true,
                })
                .cloned()
                .collect();
            let sessions = db::fetch_sessions(&pool, None).await?;
            let records = db::fetch_attendance_records(&pool, None, None).await?;
            let school_year = db::active_school_year(&pool).await?;
            let scope_label = match &viewer {
                Viewer::Faculty { .. } => cli.as_faculty.clone().unwrap_or_default(),
                _ => "all students".to_string(),
            };

            let report = report::build_report(&report::CohortReport {
                scope_label: &scope_label,
                school_year: school_year.as_deref(),
                distribution: &counts,
                at_risk: &at_risk,
                subjects: report::summarize_by_subject(&book.grades, &visible),
                weeks: report::weekly_attendance(&sessions, &records, &visible),
            });
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::ReportCard { student, out } => {
            let student = db::find_student(&pool, student).await?;
            if let Viewer::Student { student_id } = &viewer {
                if *student_id != student.id {
                    anyhow::bail!("students may only view their own report card");
                }
            }
            let subjects = db::fetch_subjects(&pool).await?;
            let grades = viewer.scope(student_grades(&pool, &student, &subjects).await?);
            let predictions = db::fetch_predictions(&pool, student.id).await?;
            let section = match student.section_id {
                Some(section_id) => db::section_label(&pool, section_id).await?,
                None => None,
            };

            let card = report::build_report_card(
                &student,
                section.as_deref(),
                &grades,
                &subjects,
                &predictions,
            );
            match out {
                Some(path) => {
                    std::fs::write(&path, card)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report card written to {}.", path.display());
                }
                None => print!("{card}"),
            }
        }
    }

    Ok(())
}
