//! services/app/src/bin/tubestudy.rs

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tubestudy_core::analytics::compute_stats_now;
use tubestudy_core::chat::SendOutcome;
use tubestudy_core::domain::{MaterialType, Provider, StudyMaterials};
use tubestudy_core::ports::SessionRepository;
use tubestudy_core::quiz::QuizError;
use tubestudy_core::sessions::{
    delete_session, get_or_create_session, merge_study_material, NewSession,
};
use tubestudy_core::transcript::extract_video_id;
use tubestudy_lib::{config::Config, context::AppContext, error::AppError};

#[derive(Parser)]
#[command(name = "tubestudy")]
#[command(about = "Turn video transcripts into quizzes, study materials and chats")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored study sessions
    Sessions,
    /// Create a session from a transcript file
    Ingest {
        /// Video URL or id
        #[arg(long)]
        url: String,
        #[arg(long)]
        title: String,
        /// Plain-text transcript
        #[arg(long)]
        transcript_file: PathBuf,
    },
    /// Generate a quiz for a video and take it
    Quiz {
        /// Video URL, video id or session id
        video: String,
        /// Number of questions (defaults to the stored setting)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Generate one study material for a video
    Material {
        video: String,
        /// summary, studyGuide, roadmap, mindMap or flashcards
        material: MaterialType,
    },
    /// Ask a question about a video; the answer streams to stdout (Ctrl-C stops it)
    Ask { video: String, question: String },
    /// Show study statistics
    Stats,
    /// List the models available to the configured provider
    Models,
    /// Change stored settings
    Settings {
        #[arg(long)]
        provider: Option<Provider>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        question_count: Option<u32>,
    },
    /// Delete a session together with its chats
    Delete { session_id: String },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    let cli = Cli::parse();

    // --- 2. Open the Stores and the Backend ---
    let mut context = AppContext::open(config).await?;
    info!("Data directory: {}", context.config.data_dir.display());

    // --- 3. Run the Command ---
    let outcome = run(&mut context, cli.command).await;
    context.close();
    outcome
}

async fn run(context: &mut AppContext, command: Command) -> Result<(), AppError> {
    match command {
        Command::Sessions => list_sessions(context).await,
        Command::Ingest {
            url,
            title,
            transcript_file,
        } => ingest(context, url, title, transcript_file).await,
        Command::Quiz { video, count } => take_quiz(context, &video, count).await,
        Command::Material { video, material } => generate_material(context, &video, material).await,
        Command::Ask { video, question } => ask(context, &video, &question).await,
        Command::Stats => {
            let sessions = context.sessions().list().await?;
            let stats = compute_stats_now(&sessions);
            println!(
                "Videos: {}  Quizzes: {}  Questions: {}",
                stats.total_videos, stats.total_quizzes, stats.total_questions
            );
            println!(
                "Average: {}%  Best: {}%  Streak: {} day(s)",
                stats.average_score, stats.best_score, stats.current_streak
            );
            for (date, count) in &stats.activity_dates {
                println!("  {}  {}", date, count);
            }
            for session in &stats.recent_sessions {
                println!("  recent: {} ({})", session.title, session.video_id);
            }
            Ok(())
        }
        Command::Models => {
            let key = context.settings.active_api_key().to_string();
            for model in context.gateway().list_models(&key).await {
                let marker = if model.id == context.model { "*" } else { " " };
                println!("{} {}  {}", marker, model.id, model.name);
            }
            Ok(())
        }
        Command::Settings {
            provider,
            model,
            question_count,
        } => {
            let mut settings = context.stored_settings().clone();
            if let Some(provider) = provider {
                if provider != settings.provider {
                    settings.selected_model.clear();
                }
                settings.provider = provider;
            }
            if let Some(model) = model {
                settings.selected_model = model;
            }
            if let Some(count) = question_count {
                settings.question_count = count.max(1);
            }
            context.update_settings(settings).await?;
            println!(
                "Provider: {}  Model: {}  Questions: {}",
                context.settings.provider.name(),
                context.model,
                context.settings.question_count
            );
            Ok(())
        }
        Command::Delete { session_id } => {
            let removed =
                delete_session(context.sessions().as_ref(), context.chats().as_ref(), &session_id)
                    .await?;
            if removed {
                println!("Deleted {}", session_id);
            } else {
                println!("No session {}", session_id);
            }
            Ok(())
        }
    }
}

async fn list_sessions(context: &AppContext) -> Result<(), AppError> {
    let sessions = context.sessions().list().await?;
    if sessions.is_empty() {
        println!("No sessions yet. Use `tubestudy ingest` to add one.");
    }
    for session in sessions {
        println!(
            "{}  {}  {}  ({} quiz attempt(s))",
            session.id,
            session.video_id,
            session.title,
            session.quiz_results.len()
        );
    }
    Ok(())
}

async fn ingest(
    context: &AppContext,
    url: String,
    title: String,
    transcript_file: PathBuf,
) -> Result<(), AppError> {
    let video_id = extract_video_id(&url)
        .ok_or_else(|| AppError::Internal(format!("'{}' is not a recognizable video URL", url)))?;
    let transcript = tokio::fs::read_to_string(&transcript_file).await?;
    if transcript.trim().is_empty() {
        return Err(AppError::Internal(format!(
            "{} is empty",
            transcript_file.display()
        )));
    }

    let session = get_or_create_session(
        context.sessions().as_ref(),
        NewSession {
            video_id,
            video_url: url,
            title,
            thumbnail_url: None,
            transcript,
        },
    )
    .await?;
    println!("{}", session.id);
    Ok(())
}

async fn take_quiz(
    context: &AppContext,
    video: &str,
    count: Option<usize>,
) -> Result<(), AppError> {
    let session = context.find_session(video).await?;
    let count = count.unwrap_or(context.settings.question_count as usize);
    let mut engine = context.quiz_engine(&session.id).await?;
    let quiz = engine.generate(count, &context.model).await?;
    println!("Quiz v{}: {}", quiz.version, quiz.title);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(question) = engine.current_question().cloned() else {
            break;
        };
        println!("\n{}. {}", question.id, question.question);
        for (index, option) in question.options.iter().enumerate() {
            println!("   {}) {}", index + 1, option);
        }
        print!("Answer (1-{}, empty to skip): ", question.options.len());
        std::io::stdout().flush()?;

        let line = lines.next_line().await?.unwrap_or_default();
        let choice = match line.trim() {
            "" => None,
            text => match text.parse::<usize>() {
                Ok(n) if n >= 1 => Some(n - 1),
                _ => {
                    println!("Please enter a number.");
                    continue;
                }
            },
        };

        match engine.answer(choice).await {
            Ok(Some(result)) => {
                println!(
                    "\nScore: {}/{} ({}%)",
                    result.score,
                    result.total_questions,
                    result.percentage()
                );
                for (question, answer) in result.quiz.questions.iter().zip(&result.answers) {
                    let mark = if *answer == Some(question.correct_answer) { "✓" } else { "✗" };
                    println!(
                        "{} {}. {}  {}",
                        mark,
                        question.id,
                        question.correct_option().unwrap_or_default(),
                        question.explanation
                    );
                }
                break;
            }
            Ok(None) => {}
            Err(QuizError::InvalidOption { .. }) => println!("That option does not exist."),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn generate_material(
    context: &AppContext,
    video: &str,
    material: MaterialType,
) -> Result<(), AppError> {
    let session = context.find_session(video).await?;
    let generated = context
        .gateway()
        .generate_study_material(material, &session.transcript, &context.model)
        .await?;
    let merged = merge_study_material(context.sessions().as_ref(), &session.id, generated).await?;
    print_material(&merged.study_materials, material)
}

fn print_material(materials: &StudyMaterials, material: MaterialType) -> Result<(), AppError> {
    let rendered = match material {
        MaterialType::Summary => materials.summary.clone(),
        MaterialType::StudyGuide => materials.study_guide.clone(),
        MaterialType::Roadmap => materials.roadmap.clone(),
        MaterialType::MindMap => materials
            .mind_map
            .as_ref()
            .map(serde_json::to_string_pretty)
            .transpose()
            .map_err(|e| AppError::Internal(e.to_string()))?,
        MaterialType::Flashcards => materials
            .flashcards
            .as_ref()
            .map(serde_json::to_string_pretty)
            .transpose()
            .map_err(|e| AppError::Internal(e.to_string()))?,
    };
    println!("{}", rendered.unwrap_or_default());
    Ok(())
}

async fn ask(context: &AppContext, video: &str, question: &str) -> Result<(), AppError> {
    let session = context.find_session(video).await?;
    let mut chat = context.chat_controller(&session);

    // The most recent conversation about this video continues.
    let history = chat.load_history().await?;
    if let Some(latest) = history.first() {
        chat.open_session(&latest.id).await?;
    }

    let stop = chat.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let mut printed = 0;
    let outcome = chat
        .send(question, &context.model, |reply| {
            if let Some(delta) = reply.get(printed..) {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
            printed = reply.len();
        })
        .await;
    interrupt.abort();
    println!();

    match outcome? {
        SendOutcome::Completed(saved) => {
            info!("Saved chat {} ({} messages)", saved.id, saved.messages.len())
        }
        SendOutcome::Cancelled => println!("(stopped)"),
    }
    Ok(())
}
