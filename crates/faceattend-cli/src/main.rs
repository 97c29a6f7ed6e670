use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use faceattend_core::data_uri::DataUri;
use faceattend_hw::{Camera, FrameSource};
use serde_json::Value;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.faceattend.Attend1",
    default_service = "org.faceattend.Attend1",
    default_path = "/org/faceattend/Attend1"
)]
trait Attend {
    async fn start_webcam(&self) -> zbus::Result<String>;
    async fn stop_webcam(&self) -> zbus::Result<String>;
    async fn enroll(&self, name: &str) -> zbus::Result<(bool, String)>;
    async fn recognize_now(&self) -> zbus::Result<String>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn student_photo(&self, name: &str) -> zbus::Result<String>;
    async fn delete_student(&self, name: &str) -> zbus::Result<u32>;
    async fn list_attendance(&self, today_only: bool) -> zbus::Result<String>;
    async fn clear_attendance(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "faceattend", about = "FaceAttend webcam attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webcam (recognition runs while students are enrolled)
    Start,
    /// Stop the webcam
    Stop,
    /// Capture a photo and register a student
    Enroll {
        /// Student name
        name: String,
    },
    /// Run one recognition attempt now
    Recognize,
    /// List enrolled students
    Students,
    /// Save a student's reference photo to a file
    Photo {
        name: String,
        /// Output file (extension is taken from the stored image type if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove a student by exact name
    Delete { name: String },
    /// Show attendance records
    Attendance {
        /// Only today's records
        #[arg(long)]
        today: bool,
    },
    /// Remove all attendance records
    Clear,
    /// Show daemon status
    Status,
    /// List V4L2 capture devices
    Devices,
    /// Capture one frame directly (bypasses the daemon)
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Write the frame as JPEG here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => return list_devices(),
        Commands::Test { device, output } => return camera_test(&device, output),
        _ => {}
    }

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = AttendProxy::new(&conn)
        .await
        .context("faceattendd is not reachable; is it running?")?;

    match cli.command {
        Commands::Start => println!("{}", proxy.start_webcam().await?),
        Commands::Stop => println!("{}", proxy.stop_webcam().await?),
        Commands::Enroll { name } => {
            println!("Capturing photo for {name}...");
            let (success, message) = proxy.enroll(&name).await?;
            if success {
                println!("{name} has been enrolled. {message}");
            } else {
                bail!("enrollment failed: {message}");
            }
        }
        Commands::Recognize => println!("{}", proxy.recognize_now().await?),
        Commands::Students => {
            let students: Vec<Value> = serde_json::from_str(&proxy.list_students().await?)?;
            if students.is_empty() {
                println!("No students enrolled yet.");
            }
            for s in students {
                println!("{}", s["name"].as_str().unwrap_or("?"));
            }
        }
        Commands::Photo { name, output } => {
            let uri = DataUri::parse(&proxy.student_photo(&name).await?)
                .context("stored photo is not a valid data URI")?;
            let path = output.unwrap_or_else(|| PathBuf::from(format!("{name}.{}", uri.extension())));
            std::fs::write(&path, &uri.bytes)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Saved {} ({} bytes)", path.display(), uri.bytes.len());
        }
        Commands::Delete { name } => match proxy.delete_student(&name).await? {
            0 => println!("No student named {name:?}."),
            n => println!("{name} has been removed ({n} entr{}).", if n == 1 { "y" } else { "ies" }),
        },
        Commands::Attendance { today } => {
            let records: Vec<Value> =
                serde_json::from_str(&proxy.list_attendance(today).await?)?;
            if records.is_empty() {
                println!("No attendance records yet.");
            }
            for r in records {
                let name = r["name"].as_str().unwrap_or("?");
                let when = r["timestamp"]
                    .as_str()
                    .and_then(|t| t.parse::<DateTime<Utc>>().ok())
                    .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "?".into());
                println!("{when}  {name}");
            }
        }
        Commands::Clear => {
            let n = proxy.clear_attendance().await?;
            println!("All attendance records have been removed ({n}).");
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Devices | Commands::Test { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found.");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

fn camera_test(device: &str, output: Option<PathBuf>) -> Result<()> {
    println!("Opening {device}...");
    let mut camera = Camera::open(device)?;
    println!("Negotiated {}x{} {:?}", camera.width, camera.height, camera.fourcc);

    let frame = camera.capture()?;
    println!(
        "Captured frame #{}: avg brightness {:.1}{}",
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark() { " (dark)" } else { "" }
    );

    if let Some(path) = output {
        let jpeg = frame.encode_jpeg(90)?;
        std::fs::write(&path, &jpeg).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {} ({} bytes)", path.display(), jpeg.len());
    }
    Ok(())
}
