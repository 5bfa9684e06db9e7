use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clockface_core::{FaceDetector, LbphParams};
use clockface_engine::{
    is_stale, AttendanceCapture, AttendanceKind, CancelFlag, Config, EmployeeId,
    EnrollmentCapture, FileModelStore, ModelStore, PipelineError, SampleStore, SessionContext, SqliteStore,
};
use clockface_hw::{Camera, V4lDevice};
use serde_json::json;
use std::io::Write;

#[derive(Parser)]
#[command(name = "clockface", about = "Face-verified attendance clock")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage employee records
    #[command(subcommand)]
    Employee(EmployeeCommand),
    /// Capture face samples for an employee
    Enroll {
        /// Employee ID
        id: i64,
    },
    /// Retrain the recognizer and mark an employee as enrolled
    Train {
        /// Employee ID
        id: i64,
    },
    /// Verify the employee's face and record a clock-in
    ClockIn(ClockArgs),
    /// Verify the employee's face and record a clock-out
    ClockOut(ClockArgs),
    /// Show enrollment and model status as JSON
    Status,
    /// List V4L2 capture devices as JSON
    Devices,
}

#[derive(Subcommand)]
enum EmployeeCommand {
    /// Add an employee
    Add {
        /// Display name
        name: String,
        /// Use this ID instead of the next free one
        #[arg(long)]
        id: Option<i64>,
    },
    /// List employees
    List,
    /// Remove an employee, their face samples and attendance rows
    Remove {
        /// Employee ID
        id: i64,
    },
}

#[derive(Args)]
struct ClockArgs {
    /// ID of the employee currently signed in
    #[arg(short, long)]
    employee: i64,
    /// Working location
    #[arg(short, long)]
    location: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Employee(cmd) => employee(&config, cmd)?,
        Commands::Enroll { id } => {
            let config = config.clone();
            run_interruptible(move |cancel| enroll(&config, EmployeeId(id), &cancel)).await?
        }
        Commands::Train { id } => {
            let config = config.clone();
            tokio::task::spawn_blocking(move || train(&config, EmployeeId(id)))
                .await
                .context("training worker panicked")??
        }
        Commands::ClockIn(args) => {
            let config = config.clone();
            run_interruptible(move |cancel| clock(&config, args, AttendanceKind::ClockIn, cancel)).await?
        }
        Commands::ClockOut(args) => {
            let config = config.clone();
            run_interruptible(move |cancel| clock(&config, args, AttendanceKind::ClockOut, cancel)).await?
        }
        Commands::Status => status(&config)?,
        Commands::Devices => devices()?,
    }

    Ok(())
}

/// Run a capture loop on a blocking worker, with Ctrl-C raising its cancel flag.
async fn run_interruptible<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(CancelFlag) -> Result<T> + Send + 'static,
{
    let cancel = CancelFlag::new();
    let worker = tokio::task::spawn_blocking({
        let cancel = cancel.clone();
        move || job(cancel)
    });
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping capture");
            cancel.cancel();
        }
    });

    let result = worker.await.context("capture worker panicked")?;
    watcher.abort();
    result
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening employee database {}", config.db_path.display()))
}

fn load_detector(config: &Config) -> Result<FaceDetector> {
    let detector = FaceDetector::load(&config.detector_model).map_err(PipelineError::from)?;
    tracing::info!(path = %config.detector_model.display(), "face detector loaded");
    Ok(detector)
}

fn employee(config: &Config, cmd: EmployeeCommand) -> Result<()> {
    let store = open_store(config)?;
    match cmd {
        EmployeeCommand::Add { name, id } => {
            let id = store.add_employee(id.map(EmployeeId), name.trim())?;
            println!("Added employee {id}: {}", name.trim());
        }
        EmployeeCommand::List => {
            for e in store.employees()? {
                println!("{:>6}  {:<16}  {}", e.id, e.status, e.display_name);
            }
        }
        EmployeeCommand::Remove { id } => {
            let id = EmployeeId(id);
            let samples = SampleStore::new(&config.sample_dir);
            let Some(removed_samples) = store.purge_employee(id, &samples)? else {
                anyhow::bail!("no employee with ID {id}");
            };
            println!("Removed employee {id} and {removed_samples} face samples");
            if removed_samples > 0 && FileModelStore::new(&config.classifier_path).exists() {
                println!("The recognizer still contains this face; run `clockface train` for another enrolled employee to refresh it.");
            }
        }
    }
    Ok(())
}

fn enroll(config: &Config, id: EmployeeId, cancel: &CancelFlag) -> Result<()> {
    let store = open_store(config)?;
    let samples = SampleStore::new(&config.sample_dir);
    let mut detector = load_detector(config)?;
    let device = V4lDevice::new(config.camera_device.clone());

    let report = EnrollmentCapture::new(&mut detector, &store, &samples, config.capture_settings()).run(
        &device,
        id,
        cancel,
        |progress| {
            if progress.region.is_some() {
                eprint!("\rCaptured {}/{} samples", progress.stored, progress.target);
                let _ = std::io::stderr().flush();
            }
        },
    )?;
    eprintln!();

    if report.cancelled {
        println!("Enrollment cancelled after {} samples.", report.stored);
    } else {
        println!("Captured {} samples for employee {id}.", report.stored);
    }
    if report.stored > 0 {
        println!("Run `clockface train {id}` to finish enrollment.");
    }
    Ok(())
}

fn train(config: &Config, id: EmployeeId) -> Result<()> {
    let store = open_store(config)?;
    let samples = SampleStore::new(&config.sample_dir);
    let models = FileModelStore::new(&config.classifier_path);

    let report = clockface_engine::train(
        &store,
        &samples,
        &models,
        id,
        LbphParams::default(),
        config.canonical_size,
    )?;
    println!(
        "Trained on {} samples from {} employees; employee {id} is enrolled.",
        report.samples, report.employees
    );
    Ok(())
}

fn clock(config: &Config, args: ClockArgs, kind: AttendanceKind, cancel: CancelFlag) -> Result<()> {
    let store = open_store(config)?;
    let models = FileModelStore::new(&config.classifier_path);
    let mut detector = load_detector(config)?;
    let device = V4lDevice::new(config.camera_device.clone());
    let context = SessionContext::new(EmployeeId(args.employee), args.location);

    let session = AttendanceCapture::new(&mut detector, &store, &store, config.recognition_settings()).start(
        &device,
        &models,
        &context,
        kind,
        cancel,
    )?;
    println!("Look at the camera. Press Ctrl-C to cancel.");

    let verified = session.run(|report| {
        for face in &report.faces {
            tracing::debug!(frame = report.frame, region = ?face.region(), annotation = face.annotation(), "face");
        }
    })?;

    match verified {
        Some(v) => println!(
            "{} recorded for {} at {} on {} {} (confidence {:.1})",
            v.event.kind,
            v.display_name,
            v.event.location,
            v.event.date_string(),
            v.event.time_string(),
            v.confidence
        ),
        None => println!("{kind} cancelled; nothing recorded."),
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let samples = SampleStore::new(&config.sample_dir);
    let models = FileModelStore::new(&config.classifier_path);
    let fingerprint = samples.fingerprint()?;

    let model = match models.load() {
        Ok(Some(model)) => json!({
            "present": true,
            "trained_at": model.trained_at.to_rfc3339(),
            "samples": model.sample_count(),
            "employees": model.labels().len(),
            "stale": is_stale(&model, &fingerprint),
        }),
        Ok(None) => json!({ "present": false }),
        Err(e) => json!({ "present": true, "error": e.to_string() }),
    };

    let mut employees = Vec::new();
    for e in store.employees()? {
        employees.push(json!({
            "id": e.id,
            "name": e.display_name,
            "status": e.status.as_str(),
            "samples": samples.count_for(e.id)?,
        }));
    }

    let report = json!({
        "camera_device": config.camera_device,
        "detector_model": {
            "path": config.detector_model.display().to_string(),
            "present": config.detector_model.is_file(),
        },
        "classifier": {
            "path": models.path().display().to_string(),
            "model": model,
        },
        "sample_dir": samples.root().display().to_string(),
        "employees": employees,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn devices() -> Result<()> {
    let devices: Vec<_> = Camera::list_devices()
        .into_iter()
        .map(|d| {
            json!({
                "path": d.path,
                "card": d.card,
                "driver": d.driver,
                "bus": d.bus,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_clock_in() {
        let cli = Cli::try_parse_from(["clockface", "clock-in", "--employee", "101", "--location", "SGH"]).unwrap();
        match cli.command {
            Commands::ClockIn(args) => {
                assert_eq!(args.employee, 101);
                assert_eq!(args.location, "SGH");
            }
            _ => panic!("expected clock-in"),
        }
    }

    #[test]
    fn test_cli_parses_employee_add_with_id() {
        let cli = Cli::try_parse_from(["clockface", "employee", "add", "Alice Tan", "--id", "7"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Employee(EmployeeCommand::Add { ref name, id: Some(7) }) if name == "Alice Tan"
        ));
    }

    #[test]
    fn test_cli_requires_location() {
        assert!(Cli::try_parse_from(["clockface", "clock-out", "--employee", "101"]).is_err());
    }
}
