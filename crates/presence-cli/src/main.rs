use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use presence_core::{
    Config, DeepFaceEmbedder, Embedding, EmbeddingError, EnrolledPerson, ExtractOutcome, Extractor,
    NewPerson, PresenceRecord, Role,
};
use presence_hw::Camera;
use presence_store::{ImageUpload, RecordOutcome, RecordStore, ScanOutcome, Scanner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "presence", about = "Presence attendance CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from a face photo
    Enroll {
        /// Display name, also used to log in
        #[arg(short, long)]
        name: String,
        /// "student" or "teacher"
        #[arg(short, long)]
        role: Role,
        /// Photo containing exactly the person's face
        image: PathBuf,
    },
    /// Identify the face in a photo and mark them present today
    Scan {
        image: PathBuf,
        /// Report the match without writing attendance
        #[arg(long)]
        no_record: bool,
    },
    /// List enrolled people
    Roster,
    /// Show who was present on a day
    Attendance {
        /// Day to show (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// List video capture devices
    Devices,
    /// Grab one frame from the configured camera and save it as JPEG
    Capture {
        #[arg(short, long, default_value = "capture.jpg")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(store = %config.store_url, embedder = %config.embedder_url, "configuration loaded");

    match cli.command {
        Commands::Enroll { name, role, image } => enroll(&config, name, role, &image).await,
        Commands::Scan { image, no_record } => scan(&config, &image, no_record).await,
        Commands::Roster => roster(&config).await,
        Commands::Attendance { date } => attendance(&config, date).await,
        Commands::Devices => {
            devices();
            Ok(())
        }
        Commands::Capture { output } => capture(&config, &output),
    }
}

fn extractor(config: &Config) -> Result<Extractor> {
    let embedder = DeepFaceEmbedder::new(
        &config.embedder_url,
        &config.embedder_model,
        config.request_timeout(),
    )?;
    Ok(Extractor::new(Arc::new(embedder)))
}

fn open_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    Ok(presence_store::open(config)?)
}

async fn extract(config: &Config, image: &Path) -> Result<Embedding> {
    match extractor(config)?.from_path(image).await {
        ExtractOutcome::Embedding(embedding) => Ok(embedding),
        ExtractOutcome::NoFace => bail!("no face detected in {}", image.display()),
        ExtractOutcome::Failed(reason) => bail!("cannot extract face from {}: {reason}", image.display()),
    }
}

async fn enroll(config: &Config, name: String, role: Role, image: &Path) -> Result<()> {
    let embedding = extract(config, image).await?;
    let bytes = std::fs::read(image).with_context(|| format!("cannot read {}", image.display()))?;
    let upload = ImageUpload {
        file_name: image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "face.jpg".to_string()),
        content_type: content_type_for(image).to_string(),
        bytes,
    };

    let store = open_store(config)?;
    let created = store
        .create_person(&NewPerson { name, role, embedding }, Some(upload))
        .await?;
    println!("Registration successful for {}! (id {})", created.name, created.id);
    Ok(())
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

async fn scan(config: &Config, image: &Path, no_record: bool) -> Result<()> {
    let embedding = extract(config, image).await?;
    let scanner = Scanner::new(open_store(config)?, config.distance_threshold);

    let outcome = if no_record {
        scanner.preview(&embedding).await
    } else {
        scanner.identify(&embedding).await
    };
    if outcome.is_error() {
        bail!("{outcome}");
    }

    println!("{outcome}");
    if let Some(note) = record_note(&outcome) {
        println!("{note}");
    }
    Ok(())
}

/// Follow-up line describing what was written for a recognized face.
fn record_note(outcome: &ScanOutcome) -> Option<&'static str> {
    match outcome {
        ScanOutcome::Present {
            recorded: Some(RecordOutcome::Created),
            ..
        } => Some("Attendance recorded"),
        ScanOutcome::Present {
            recorded: Some(RecordOutcome::AlreadyRecorded),
            ..
        } => Some("Already recorded today"),
        _ => None,
    }
}

/// Whether a stored embedding is usable for matching.
fn embedding_status(person: &EnrolledPerson) -> String {
    match Embedding::from_stored(&person.face_embedding) {
        Ok(e) => format!("{}-d", e.len()),
        Err(EmbeddingError::Missing) => "missing".to_string(),
        Err(e) => format!("unusable ({e})"),
    }
}

async fn roster(config: &Config) -> Result<()> {
    let people = open_store(config)?.list_people().await?;
    if people.is_empty() {
        println!("No one enrolled");
        return Ok(());
    }

    println!("{:<16} {:<24} {:<8} EMBEDDING", "ID", "NAME", "ROLE");
    for person in &people {
        println!(
            "{:<16} {:<24} {:<8} {}",
            person.id,
            person.name,
            person.role,
            embedding_status(person)
        );
    }
    Ok(())
}

/// One line per record on `date`, with the person's name where known.
fn attendance_rows(
    people: &[EnrolledPerson],
    records: &[PresenceRecord],
    date: NaiveDate,
) -> Vec<(String, bool)> {
    records
        .iter()
        .filter(|r| r.date == date)
        .map(|r| {
            let name = people
                .iter()
                .find(|p| p.id == r.person_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("<unknown {}>", r.person_id));
            (name, r.present)
        })
        .collect()
}

async fn attendance(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let store = open_store(config)?;
    let people = store.list_people().await?;
    let records = store.list_presences().await?;

    let rows = attendance_rows(&people, &records, date);
    if rows.is_empty() {
        println!("No attendance recorded for {date}");
        return Ok(());
    }

    println!("Attendance for {date}:");
    for (name, present) in rows {
        println!("  {name:<24} {}", if present { "present" } else { "absent" });
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No video capture devices found");
        return;
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}

fn capture(config: &Config, output: &Path) -> Result<()> {
    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("cannot open camera {}", config.camera_device))?;
    let frame = camera.capture_frame().context("cannot capture frame")?;
    let jpeg = frame.to_jpeg()?;
    std::fs::write(output, jpeg).with_context(|| format!("cannot write {}", output.display()))?;
    println!(
        "Saved {}x{} {:?} frame #{} to {}",
        frame.width(),
        frame.height(),
        camera.pixel_format(),
        frame.sequence,
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person(id: &str, name: &str, embedding: serde_json::Value) -> EnrolledPerson {
        EnrolledPerson {
            id: id.into(),
            name: name.into(),
            role: Role::Student,
            face_embedding: embedding,
        }
    }

    #[test]
    fn test_cli_parses_enroll() {
        let cli = Cli::try_parse_from(["presence", "enroll", "-n", "Ada", "-r", "Teacher", "ada.jpg"]).unwrap();
        match cli.command {
            Commands::Enroll { name, role, image } => {
                assert_eq!(name, "Ada");
                assert_eq!(role, Role::Teacher);
                assert_eq!(image, PathBuf::from("ada.jpg"));
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_role() {
        assert!(Cli::try_parse_from(["presence", "enroll", "-n", "Ada", "-r", "janitor", "a.jpg"]).is_err());
    }

    #[test]
    fn test_cli_parses_attendance_date() {
        let cli = Cli::try_parse_from(["presence", "attendance", "--date", "2024-09-02"]).unwrap();
        match cli.command {
            Commands::Attendance { date } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 9, 2));
            }
            _ => panic!("expected attendance"),
        }
    }

    #[test]
    fn test_embedding_status() {
        assert_eq!(embedding_status(&person("a", "A", json!([1.0, 2.0]))), "2-d");
        assert_eq!(embedding_status(&person("b", "B", json!(null))), "missing");
        assert!(embedding_status(&person("c", "C", json!("nope"))).starts_with("unusable"));
    }

    #[test]
    fn test_attendance_rows_filters_day_and_names() {
        let day = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        let other = NaiveDate::from_ymd_opt(2024, 9, 3).unwrap();
        let people = vec![person("a", "Ada", json!([0.0]))];
        let records = vec![
            PresenceRecord {
                id: Some("r1".into()),
                person_id: "a".into(),
                date: day,
                present: true,
            },
            PresenceRecord {
                id: Some("r2".into()),
                person_id: "gone".into(),
                date: day,
                present: true,
            },
            PresenceRecord {
                id: Some("r3".into()),
                person_id: "a".into(),
                date: other,
                present: true,
            },
        ];

        let rows = attendance_rows(&people, &records, day);
        assert_eq!(
            rows,
            vec![("Ada".to_string(), true), ("<unknown gone>".to_string(), true)]
        );
    }

    #[test]
    fn test_record_note() {
        let present = |recorded| ScanOutcome::Present {
            person_id: "a".into(),
            name: "Ada".into(),
            distance: 0.5,
            recorded,
        };
        assert_eq!(record_note(&present(Some(RecordOutcome::Created))), Some("Attendance recorded"));
        assert_eq!(
            record_note(&present(Some(RecordOutcome::AlreadyRecorded))),
            Some("Already recorded today")
        );
        assert_eq!(record_note(&present(None)), None);
        assert_eq!(record_note(&ScanOutcome::NoMatch { min_distance: Some(12.0) }), None);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a")), "image/jpeg");
    }
}
