use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use imgfit_core::{
    ConversionRequest, ConversionSummary, ConverterSettings, ErrorInfo, ImageExtension, TelemetryEvent, TelemetryEventType,
    TelemetrySink, OUTPUT_FOLDER_NAME,
};
use imgfit_image::convert_with_telemetry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no input images selected")]
    NoInputs,
    #[error("target extension '{0}' cannot be produced by the raster pipeline")]
    UnsupportedTarget(ImageExtension),
    #[error("input path has no file name: {}", .0.display())]
    MissingFileName(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// `<Pictures>/imgfit`, falling back to `<home>/Pictures/imgfit` and then a
/// relative `imgfit` directory.
pub fn default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Pictures")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(OUTPUT_FOLDER_NAME)
}

pub fn ensure_output_dir(dir: &Path) -> Result<(), PlanError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

pub fn is_allowed_input(path: &Path) -> bool {
    ImageExtension::from_path(path).is_some()
}

pub fn validate_start(inputs: &[PathBuf], settings: &ConverterSettings) -> Result<(), PlanError> {
    if inputs.is_empty() {
        return Err(PlanError::NoInputs);
    }
    if settings.convert_extension && !settings.target_extension.is_raster() {
        return Err(PlanError::UnsupportedTarget(settings.target_extension));
    }
    Ok(())
}

pub fn can_start(inputs: &[PathBuf], settings: &ConverterSettings) -> bool {
    validate_start(inputs, settings).is_ok()
}

/// `<output_dir>/<prefix><file name>`, with the extension swapped for the
/// target one when extension conversion is on.
pub fn plan_output_path(input: &Path, settings: &ConverterSettings) -> Result<PathBuf, PlanError> {
    let file_name = input
        .file_name()
        .ok_or_else(|| PlanError::MissingFileName(input.to_path_buf()))?
        .to_string_lossy();
    let path = settings
        .output_dir
        .join(format!("{}{}", settings.effective_prefix(), file_name));
    if settings.convert_extension {
        return Ok(path.with_extension(settings.target_extension.extension()));
    }
    Ok(path)
}

pub fn plan_requests(inputs: &[PathBuf], settings: &ConverterSettings) -> Result<Vec<ConversionRequest>, PlanError> {
    validate_start(inputs, settings)?;
    let size_limit = settings.effective_size_limit();
    inputs
        .iter()
        .map(|input| {
            Ok(ConversionRequest {
                input: input.clone(),
                output: plan_output_path(input, settings)?,
                size_limit,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchState {
    Idle,
    Converting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub state: BatchState,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self {
            state: BatchState::Idle,
            current: 0,
            total: 0,
            message: String::new(),
        }
    }
}

impl BatchProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.current as f32 / self.total as f32
    }

    pub fn is_running(&self) -> bool {
        self.state == BatchState::Converting
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &BatchProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&BatchProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &BatchProgress) {
        self(progress)
    }
}

/// Progress slot a presentation layer can poll while a batch runs on
/// another thread.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress {
    inner: Arc<Mutex<BatchProgress>>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BatchProgress {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl ProgressObserver for SharedProgress {
    fn on_progress(&self, progress: &BatchProgress) {
        let mut slot = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = progress.clone();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ConversionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    /// Files never attempted because the batch aborted early.
    pub skipped: usize,
}

/// Converts each request in order. A failing file is recorded and, under
/// [`FailurePolicy::Continue`], the loop moves on to the next one.
pub fn run_batch(
    requests: &[ConversionRequest],
    policy: FailurePolicy,
    observer: Option<&dyn ProgressObserver>,
    telemetry: Option<&dyn TelemetrySink>,
) -> BatchReport {
    let total = requests.len();
    let start = Instant::now();
    let mut progress = BatchProgress {
        state: BatchState::Converting,
        current: 0,
        total,
        message: "Starting conversion...".to_string(),
    };
    notify(observer, &progress);
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type: TelemetryEventType::BatchStart,
            input: None,
            duration_ms: None,
            detail: Some(format!("files={},policy={:?}", total, policy)),
        });
    }

    let mut report = BatchReport::default();
    for (idx, request) in requests.iter().enumerate() {
        let outcome = match convert_with_telemetry(request, telemetry) {
            Ok(summary) => FileOutcome {
                input: request.input.clone(),
                output: request.output.clone(),
                summary: Some(summary),
                error: None,
            },
            Err(err) => FileOutcome {
                input: request.input.clone(),
                output: request.output.clone(),
                summary: None,
                error: Some(err.as_error_info()),
            },
        };
        let ok = outcome.succeeded();
        if ok {
            report.succeeded += 1;
        } else {
            report.failed += 1;
        }
        report.outcomes.push(outcome);

        progress.current = idx + 1;
        progress.message = format!("Converted {} ({}/{})", display_name(&request.input), idx + 1, total);
        notify(observer, &progress);

        if !ok && policy == FailurePolicy::Abort {
            break;
        }
    }
    report.skipped = total - report.outcomes.len();

    progress.state = if report.failed == 0 {
        BatchState::Completed
    } else {
        BatchState::Failed
    };
    progress.message = format!("Completed: {} succeeded, {} failed", report.succeeded, report.failed);
    notify(observer, &progress);
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type: TelemetryEventType::BatchFinish,
            input: None,
            duration_ms: Some(start.elapsed().as_millis() as u64),
            detail: Some(format!(
                "succeeded={},failed={},skipped={}",
                report.succeeded, report.failed, report.skipped
            )),
        });
    }
    report
}

/// Runs [`run_batch`] on a dedicated worker thread, publishing progress
/// into `progress`.
pub fn spawn_batch(
    requests: Vec<ConversionRequest>,
    policy: FailurePolicy,
    progress: SharedProgress,
    telemetry: Option<Box<dyn TelemetrySink>>,
) -> JoinHandle<BatchReport> {
    thread::spawn(move || run_batch(&requests, policy, Some(&progress), telemetry.as_deref()))
}

fn notify(observer: Option<&dyn ProgressObserver>, progress: &BatchProgress) {
    if let Some(observer) = observer {
        observer.on_progress(progress);
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use imgfit_core::{ErrorCode, SizeLimit};

    fn settings(dir: &Path) -> ConverterSettings {
        ConverterSettings::with_output_dir(dir.to_path_buf())
    }

    fn write_rgb(path: &Path, width: u32, height: u32) {
        ImageBuffer::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 30, 60]))
            .save(path)
            .expect("fixture image");
    }

    #[test]
    fn output_path_gets_prefix_and_target_extension() {
        let cfg = settings(Path::new("/out"));
        let path = plan_output_path(Path::new("/photos/cat.png"), &cfg).expect("plan");
        assert_eq!(path, PathBuf::from("/out/s_cat.jpg"));
    }

    #[test]
    fn output_path_keeps_extension_and_name_when_toggles_are_off() {
        let mut cfg = settings(Path::new("/out"));
        cfg.convert_extension = false;
        cfg.add_prefix = false;
        let path = plan_output_path(Path::new("/photos/cat.TIFF"), &cfg).expect("plan");
        assert_eq!(path, PathBuf::from("/out/cat.TIFF"));
    }

    #[test]
    fn output_path_only_replaces_last_extension() {
        let mut cfg = settings(Path::new("/out"));
        cfg.target_extension = ImageExtension::Bmp;
        cfg.file_name_prefix = "small-".to_string();
        let path = plan_output_path(Path::new("archive.v2.png"), &cfg).expect("plan");
        assert_eq!(path, PathBuf::from("/out/small-archive.v2.bmp"));
    }

    #[test]
    fn start_requires_inputs_and_raster_target() {
        let mut cfg = settings(Path::new("/out"));
        assert!(!can_start(&[], &cfg));
        let inputs = vec![PathBuf::from("a.png")];
        assert!(can_start(&inputs, &cfg));

        cfg.target_extension = ImageExtension::Svg;
        assert!(matches!(validate_start(&inputs, &cfg), Err(PlanError::UnsupportedTarget(ImageExtension::Svg))));
        cfg.convert_extension = false;
        assert!(can_start(&inputs, &cfg));
    }

    #[test]
    fn plan_requests_drops_limit_when_resizing_is_off() {
        let mut cfg = settings(Path::new("/out"));
        let inputs = vec![PathBuf::from("a.png"), PathBuf::from("b.gif")];
        let requests = plan_requests(&inputs, &cfg).expect("plan");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].output, PathBuf::from("/out/s_b.jpg"));
        assert_eq!(requests[0].size_limit, Some(SizeLimit::new(1280, 800)));

        cfg.limit_size = false;
        let requests = plan_requests(&inputs, &cfg).expect("plan");
        assert!(requests.iter().all(|r| r.size_limit.is_none()));
    }

    #[test]
    fn allowed_inputs_follow_the_picker_list() {
        assert!(is_allowed_input(Path::new("x.JPG")));
        assert!(is_allowed_input(Path::new("x.svg")));
        assert!(!is_allowed_input(Path::new("x.webp")));
        assert!(!is_allowed_input(Path::new("README")));
    }

    #[test]
    fn batch_continues_past_failures_and_reports_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = dir.path().join("good.bmp");
        let bad = dir.path().join("bad.png");
        let also_good = dir.path().join("also_good.bmp");
        write_rgb(&good, 40, 20);
        std::fs::write(&bad, b"definitely not a png").expect("bad fixture");
        write_rgb(&also_good, 10, 10);

        let out = dir.path().join("out");
        let mut cfg = settings(&out);
        cfg.size_limit = SizeLimit::new(20, 20);
        ensure_output_dir(&out).expect("output dir");
        let requests = plan_requests(&[good, bad, also_good], &cfg).expect("plan");

        let progress = SharedProgress::new();
        let report = run_batch(&requests, FailurePolicy::Continue, Some(&progress), None);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(
            report.outcomes[1].error.as_ref().map(|e| e.code),
            Some(ErrorCode::DecodeError)
        );
        assert_eq!(
            image::image_dimensions(out.join("s_good.jpg")).expect("dimensions"),
            (20, 10)
        );

        let last = progress.snapshot();
        assert_eq!(last.state, BatchState::Failed);
        assert_eq!(last.current, 3);
        assert_eq!(last.fraction(), 1.0);
    }

    #[test]
    fn abort_policy_stops_at_first_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let requests = vec![
            ConversionRequest {
                input: dir.path().join("missing.bmp"),
                output: dir.path().join("a.bmp"),
                size_limit: None,
            },
            ConversionRequest {
                input: dir.path().join("missing2.bmp"),
                output: dir.path().join("b.bmp"),
                size_limit: None,
            },
        ];
        let seen = Mutex::new(Vec::new());
        let observer = |p: &BatchProgress| seen.lock().expect("seen lock").push(p.current);
        let report = run_batch(&requests, FailurePolicy::Abort, Some(&observer), None);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 1]);
    }

    #[test]
    fn spawned_batch_publishes_completion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("tile.bmp");
        write_rgb(&input, 8, 8);
        let requests = vec![ConversionRequest {
            input,
            output: dir.path().join("tile.png"),
            size_limit: Some(SizeLimit::new(4, 4)),
        }];

        let progress = SharedProgress::new();
        let handle = spawn_batch(requests, FailurePolicy::Continue, progress.clone(), None);
        let report = handle.join().expect("worker thread");
        assert_eq!(report.succeeded, 1);
        let last = progress.snapshot();
        assert_eq!(last.state, BatchState::Completed);
        assert!(!last.is_running());
    }
}
