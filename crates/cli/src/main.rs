//! certrack CLI - training session composition and progress tracking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use certrack_core::{
    AttendanceStatus, CompletionRecord, ComponentId, CourseId, CoursePrerequisite, EngineConfig,
    EnrollmentId, PrerequisiteType, ProgressId, SessionId, StudentId, TemplateFilter, TemplateId,
};
use certrack_prerequisites::PrerequisiteRegistry;
use certrack_progress::{CompletionAggregator, ProgressEngine, ProgressNotes, SessionSpec};
use certrack_storage::{CompletionHistory, JsonStorage};
use certrack_templates::{ComponentSpec, TemplateSpec, TemplateStore};

#[derive(Parser)]
#[command(name = "certrack")]
#[command(about = "Training session composition and progress tracking", long_about = None)]
struct Cli {
    /// Data directory
    #[arg(long, global = true, default_value = ".certrack")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage session templates
    #[command(subcommand)]
    Template(TemplateCmd),
    /// Manage template components
    #[command(subcommand)]
    Component(ComponentCmd),
    /// Manage course prerequisites
    #[command(subcommand)]
    Prereq(PrereqCmd),
    /// Record student history
    #[command(subcommand)]
    History(HistoryCmd),
    /// Manage sessions
    #[command(subcommand)]
    Session(SessionCmd),
    /// Enroll a student in a session
    Enroll {
        student: String,
        session: String,
    },
    /// Drive component progress
    #[command(subcommand)]
    Progress(ProgressCmd),
    /// Reporting
    #[command(subcommand)]
    Stats(StatsCmd),
}

#[derive(Subcommand)]
enum TemplateCmd {
    /// Create a template
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        code: String,
        /// SINGLE_COURSE, MULTI_COURSE, WORKSHOP_SERIES or CERTIFICATION_TRACK
        #[arg(long = "type")]
        template_type: String,
        /// Planned total minutes
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        duration: i64,
        /// Estimated break minutes
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        breaks: i64,
        #[arg(long, allow_hyphen_values = true)]
        max_participants: Option<i64>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        public: bool,
    },
    /// Show a template by id or code
    Show { template: String },
    /// List templates
    List {
        /// Include deactivated templates
        #[arg(long)]
        all: bool,
    },
    /// Stop new sessions from using a template
    Deactivate { template: String },
    /// Re-enable a template
    Activate { template: String },
    /// Delete a template that no session uses
    Delete { template: String },
    /// Lint a template's structure
    Validate { template: String },
}

#[derive(Subcommand)]
enum ComponentCmd {
    /// Add a component
    Add {
        template: String,
        #[arg(long)]
        name: String,
        /// COURSE, BREAK, ASSESSMENT, ACTIVITY, DISCUSSION, PRACTICAL or LUNCH
        #[arg(long = "type")]
        component_type: String,
        #[arg(long)]
        course: Option<String>,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        duration: i64,
        /// Explicit position
        #[arg(long, allow_hyphen_values = true)]
        order: Option<i64>,
        #[arg(long)]
        optional: bool,
        /// WRITTEN, PRACTICAL, BOTH or OBSERVATION
        #[arg(long)]
        assessment: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        min_score: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        max_attempts: Option<i64>,
    },
    /// Replace the component order
    Reorder {
        template: String,
        /// Every component id, in the new order
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete a component no progress refers to
    Delete { id: String },
}

#[derive(Subcommand)]
enum PrereqCmd {
    /// Add a prerequisite edge
    Add {
        course: String,
        prerequisite: String,
        /// REQUIRED, RECOMMENDED, ALTERNATIVE or CONCURRENT
        #[arg(long = "type", default_value = "REQUIRED")]
        prerequisite_type: String,
        #[arg(long)]
        min_score: Option<f32>,
        #[arg(long)]
        validity_months: Option<u32>,
        #[arg(long)]
        qualification: Option<String>,
    },
    /// List edges gating a course
    List { course: String },
    /// Check a student's eligibility for courses taken together
    Check {
        student: String,
        #[arg(required = true)]
        courses: Vec<String>,
    },
}

#[derive(Subcommand)]
enum HistoryCmd {
    /// Record a course completion
    Add {
        student: String,
        course: String,
        #[arg(long)]
        score: Option<f32>,
        /// Record a failed completion
        #[arg(long)]
        failed: bool,
        /// Completion time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Record a held qualification
    Qualify { student: String, qualification: String },
    /// Show a student's history
    Show { student: String },
}

#[derive(Subcommand)]
enum SessionCmd {
    /// Instantiate a session from a template
    Create {
        template: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        starts_at: Option<DateTime<Utc>>,
        #[arg(long, allow_hyphen_values = true)]
        max_participants: Option<i64>,
    },
    /// Completion figures for a session
    Stats { session: String },
}

#[derive(Subcommand)]
enum ProgressCmd {
    /// Start a component
    Start { id: String },
    /// Complete a non-assessment component
    Complete { id: String },
    /// Record an assessment score
    Score {
        id: String,
        #[arg(allow_hyphen_values = true)]
        score: f32,
    },
    /// Reopen a failed assessment
    Retry { id: String },
    /// Skip a component
    Skip {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Excuse a student from a component
    Excuse {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Record attendance
    Attend {
        id: String,
        /// REGISTERED, PRESENT, ABSENT, LATE, EARLY_DEPARTURE or EXCUSED
        status: String,
        #[arg(long)]
        percentage: Option<f32>,
    },
    /// Record notes
    Note {
        id: String,
        #[arg(long)]
        instructor: Option<String>,
        #[arg(long)]
        feedback: Option<String>,
        #[arg(long)]
        completion: Option<String>,
        #[arg(long)]
        participation: Option<f32>,
    },
    /// Show an enrollment's progress
    Show { enrollment: String },
}

#[derive(Subcommand)]
enum StatsCmd {
    /// Usage of a template across sessions
    Template { template: String },
    /// Summary of one enrollment
    Enrollment { enrollment: String },
}

struct App {
    storage: Arc<JsonStorage>,
    templates: TemplateStore,
    prerequisites: PrerequisiteRegistry,
    engine: ProgressEngine,
    aggregator: CompletionAggregator,
}

impl App {
    async fn open(data_dir: &Path) -> Result<Self> {
        let config = load_config(data_dir).await?;
        let storage = Arc::new(
            JsonStorage::new(data_dir)
                .await
                .with_context(|| format!("opening store at {}", data_dir.display()))?,
        );
        Ok(Self {
            templates: TemplateStore::new(storage.clone()).with_config(config.clone()),
            prerequisites: PrerequisiteRegistry::new(storage.clone(), storage.clone()),
            engine: ProgressEngine::new(storage.clone(), storage.clone()).with_config(config),
            aggregator: CompletionAggregator::new(storage.clone()),
            storage,
        })
    }

    async fn template_id(&self, key: &str) -> Result<TemplateId> {
        if let Ok(id) = key.parse::<TemplateId>() {
            return Ok(id);
        }
        Ok(self.templates.find_by_code(key).await?.template.id)
    }
}

async fn load_config(data_dir: &Path) -> Result<EngineConfig> {
    let path = data_dir.join("config.json");
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(EngineConfig::default());
    }
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let config = EngineConfig::from_json(&raw).with_context(|| format!("parsing {}", path.display()))?;
    debug!(?config, "loaded config");
    Ok(config)
}

fn parse<T: std::str::FromStr>(kind: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| anyhow!("Invalid {} ID: {}", kind, raw))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::open(&cli.data_dir).await?;

    match cli.command {
        Commands::Template(cmd) => run_template(&app, cmd).await?,
        Commands::Component(cmd) => run_component(&app, cmd).await?,
        Commands::Prereq(cmd) => run_prereq(&app, cmd).await?,
        Commands::History(cmd) => run_history(&app, cmd).await?,
        Commands::Session(cmd) => run_session(&app, cmd).await?,
        Commands::Enroll { student, session } => {
            let enrolled = app
                .engine
                .enroll(&StudentId::new(student), parse::<SessionId>("session", &session)?)
                .await?;
            println!("Enrolled: {}", enrolled.enrollment.id);
            for id in &enrolled.enrollment.progress_ids {
                println!("  progress {}", id);
            }
            for course in &enrolled.advisories {
                println!("  recommended first: {}", course);
            }
        }
        Commands::Progress(cmd) => run_progress(&app, cmd).await?,
        Commands::Stats(cmd) => match cmd {
            StatsCmd::Template { template } => {
                let id = app.template_id(&template).await?;
                print_json(&app.aggregator.template_usage_stats(id).await?)?;
            }
            StatsCmd::Enrollment { enrollment } => {
                let id = parse::<EnrollmentId>("enrollment", &enrollment)?;
                print_json(&app.aggregator.enrollment_summary(id).await?)?;
            }
        },
    }

    Ok(())
}

async fn run_template(app: &App, cmd: TemplateCmd) -> Result<()> {
    match cmd {
        TemplateCmd::Create {
            name,
            code,
            template_type,
            duration,
            breaks,
            max_participants,
            description,
            public,
        } => {
            let mut spec = TemplateSpec::new(name, code, template_type);
            spec.total_duration_minutes = duration;
            spec.estimated_break_minutes = breaks;
            spec.max_participants = max_participants;
            spec.description = description;
            spec.is_public = public;
            let created = app.templates.create_template(spec).await?;
            println!("Created template: {} ({})", created.template.id, created.template.code);
        }
        TemplateCmd::Show { template } => {
            let id = app.template_id(&template).await?;
            print_json(&app.templates.get_template(id).await?)?;
        }
        TemplateCmd::List { all } => {
            let filter = TemplateFilter {
                is_active: if all { None } else { Some(true) },
                ..Default::default()
            };
            let templates = app.templates.list_templates(&filter).await?;
            println!("Templates ({})", templates.len());
            for t in templates {
                println!(
                    "  {} | {} | {} | v{}{} - {}",
                    t.id,
                    t.code,
                    t.template_type,
                    t.version,
                    if t.is_active { "" } else { " (inactive)" },
                    t.name
                );
            }
        }
        TemplateCmd::Deactivate { template } => {
            let id = app.template_id(&template).await?;
            app.templates.deactivate_template(id).await?;
            println!("Deactivated template: {}", id);
        }
        TemplateCmd::Activate { template } => {
            let id = app.template_id(&template).await?;
            app.templates.activate_template(id).await?;
            println!("Activated template: {}", id);
        }
        TemplateCmd::Delete { template } => {
            let id = app.template_id(&template).await?;
            app.templates.delete_template(id).await?;
            println!("Deleted template: {}", id);
        }
        TemplateCmd::Validate { template } => {
            let id = app.template_id(&template).await?;
            let warnings = app.templates.validate_structure(id).await?;
            if warnings.is_empty() {
                println!("No structural warnings");
            }
            for w in warnings {
                println!("  warning: {}", w);
            }
        }
    }
    Ok(())
}

async fn run_component(app: &App, cmd: ComponentCmd) -> Result<()> {
    match cmd {
        ComponentCmd::Add {
            template,
            name,
            component_type,
            course,
            duration,
            order,
            optional,
            assessment,
            min_score,
            max_attempts,
        } => {
            let id = app.template_id(&template).await?;
            let mut spec = ComponentSpec::new(name, component_type, duration);
            spec.course_id = course;
            spec.sequence_order = order;
            spec.is_mandatory = !optional;
            if assessment.is_some() || min_score.is_some() || max_attempts.is_some() {
                spec.has_assessment = Some(true);
                spec.assessment_type = assessment;
                spec.min_score_required = min_score;
                spec.max_attempts = max_attempts;
            }
            let component = app.templates.add_component(id, spec).await?;
            println!("Added component: {} at {}", component.id, component.sequence_order);
        }
        ComponentCmd::Reorder { template, ids } => {
            let id = app.template_id(&template).await?;
            let ids = ids
                .iter()
                .map(|raw| parse::<ComponentId>("component", raw))
                .collect::<Result<Vec<_>>>()?;
            for c in app.templates.reorder_components(id, &ids).await? {
                println!("  {} {}", c.sequence_order, c.name);
            }
        }
        ComponentCmd::Delete { id } => {
            let id = parse::<ComponentId>("component", &id)?;
            app.templates.delete_component(id).await?;
            println!("Deleted component: {}", id);
        }
    }
    Ok(())
}

async fn run_prereq(app: &App, cmd: PrereqCmd) -> Result<()> {
    match cmd {
        PrereqCmd::Add {
            course,
            prerequisite,
            prerequisite_type,
            min_score,
            validity_months,
            qualification,
        } => {
            let kind: PrerequisiteType = prerequisite_type.parse()?;
            let mut edge = CoursePrerequisite::new(course.as_str(), prerequisite.as_str(), kind);
            edge.min_score_required = min_score;
            edge.validity_months = validity_months;
            edge.alternative_qualification = qualification;
            let edge = app.prerequisites.add_edge(edge).await?;
            println!("Added prerequisite: {}", edge.id);
        }
        PrereqCmd::List { course } => {
            print_json(&app.prerequisites.edges_for(&CourseId::new(course)).await?)?;
        }
        PrereqCmd::Check { student, courses } => {
            let courses: Vec<CourseId> = courses.into_iter().map(CourseId::from).collect();
            let result = app
                .prerequisites
                .check(&StudentId::new(student), &courses, Utc::now())
                .await?;
            if result.eligible {
                println!("Eligible");
            } else {
                println!("Not eligible");
            }
            for m in &result.missing {
                println!("  missing: {}", m);
            }
            for course in &result.advisories {
                println!("  recommended: {}", course);
            }
        }
    }
    Ok(())
}

async fn run_history(app: &App, cmd: HistoryCmd) -> Result<()> {
    match cmd {
        HistoryCmd::Add {
            student,
            course,
            score,
            failed,
            at,
        } => {
            let record = CompletionRecord {
                course_id: CourseId::new(course),
                passed: !failed,
                score,
                completed_at: at.unwrap_or_else(Utc::now),
            };
            app.storage.record_completion(&StudentId::new(student), record).await?;
            println!("Recorded completion");
        }
        HistoryCmd::Qualify { student, qualification } => {
            app.storage
                .add_qualification(&StudentId::new(student), &qualification)
                .await?;
            println!("Recorded qualification");
        }
        HistoryCmd::Show { student } => {
            print_json(&app.storage.history(&StudentId::new(student)).await?)?;
        }
    }
    Ok(())
}

async fn run_session(app: &App, cmd: SessionCmd) -> Result<()> {
    match cmd {
        SessionCmd::Create {
            template,
            name,
            starts_at,
            max_participants,
        } => {
            let id = app.template_id(&template).await?;
            let spec = SessionSpec {
                name,
                starts_at,
                max_participants,
            };
            let session = app.engine.create_session(id, spec).await?;
            println!(
                "Created session: {} ({} components, template v{})",
                session.id,
                session.components.len(),
                session.template_version
            );
        }
        SessionCmd::Stats { session } => {
            let id = parse::<SessionId>("session", &session)?;
            let stats = app.aggregator.session_stats(id).await?;
            println!("Session: {} ({})", stats.name, stats.session_id);
            println!("  Enrollments: {}", stats.enrollments);
            println!("  Excluded (all excused): {}", stats.excluded_enrollments);
            println!(
                "  Completion: {}/{} ({:.1}%)",
                stats.completion.completed,
                stats.completion.total,
                stats.completion.rate() * 100.0
            );
        }
    }
    Ok(())
}

async fn run_progress(app: &App, cmd: ProgressCmd) -> Result<()> {
    let updated = match cmd {
        ProgressCmd::Show { enrollment } => {
            let id = parse::<EnrollmentId>("enrollment", &enrollment)?;
            for p in app.engine.enrollment_progress(id).await? {
                println!(
                    "  {} | {} | attempts {}/{} | {}{}",
                    p.id,
                    p.status,
                    p.attempts,
                    p.max_attempts,
                    p.attendance_status,
                    p.score.map(|s| format!(" | score {:.1}", s)).unwrap_or_default()
                );
            }
            return Ok(());
        }
        ProgressCmd::Start { id } => app.engine.start(parse::<ProgressId>("progress", &id)?).await?,
        ProgressCmd::Complete { id } => app.engine.complete(parse::<ProgressId>("progress", &id)?).await?,
        ProgressCmd::Score { id, score } => {
            app.engine
                .record_score(parse::<ProgressId>("progress", &id)?, score)
                .await?
        }
        ProgressCmd::Retry { id } => app.engine.retry(parse::<ProgressId>("progress", &id)?).await?,
        ProgressCmd::Skip { id, reason } => {
            app.engine.skip(parse::<ProgressId>("progress", &id)?, reason).await?
        }
        ProgressCmd::Excuse { id, reason } => {
            app.engine.excuse(parse::<ProgressId>("progress", &id)?, reason).await?
        }
        ProgressCmd::Attend { id, status, percentage } => {
            let status: AttendanceStatus = status.parse()?;
            app.engine
                .record_attendance(parse::<ProgressId>("progress", &id)?, status, percentage)
                .await?
        }
        ProgressCmd::Note {
            id,
            instructor,
            feedback,
            completion,
            participation,
        } => {
            let notes = ProgressNotes {
                instructor_notes: instructor,
                participant_feedback: feedback,
                completion_notes: completion,
                participation_score: participation,
            };
            app.engine
                .record_notes(parse::<ProgressId>("progress", &id)?, notes)
                .await?
        }
    };

    println!("Progress {}: {}", updated.id, updated.status);
    Ok(())
}
