use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use imgfit_batch::{
    default_output_dir, ensure_output_dir, is_allowed_input, plan_requests, run_batch, BatchProgress, FailurePolicy,
};
use imgfit_core::{resolve_settings, ImageExtension, SettingsOverrides};
use imgfit_telemetry::sink_from_env;
use regex::Regex;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "imgfit", version, about = "Batch resize and re-encode images")]
struct Cli {
    #[command(subcommand)]
    command: TopLevelCommand,
}

#[derive(Subcommand, Debug)]
enum TopLevelCommand {
    Convert(ConvertArgs),
    /// List the selectable image extensions.
    Formats,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Image file, directory, or a regex matched against file names.
    #[arg(long, short = 'i')]
    input: String,
    /// Root directory for regex input matching (defaults to current directory).
    #[arg(long, short = 'r')]
    input_root: Option<PathBuf>,
    /// Recurse when scanning directories / regex matches.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    recursive: bool,
    /// Abort the batch on the first failed file and exit non-zero.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    strict: bool,
    #[arg(long, short = 'f')]
    format: Option<String>,
    /// Keep each input's own extension instead of converting.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    keep_format: bool,
    #[arg(long, short = 'W')]
    max_width: Option<u32>,
    #[arg(long, short = 'H')]
    max_height: Option<u32>,
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    no_resize: bool,
    #[arg(long, short = 'p')]
    prefix: Option<String>,
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    no_prefix: bool,
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,
    /// Print the planned conversions without writing anything.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    dry_run: bool,
    #[arg(long, short = 'q', default_value_t = false, action = clap::ArgAction::SetTrue)]
    quiet: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        TopLevelCommand::Formats => {
            let formats: Vec<_> = ImageExtension::all()
                .into_iter()
                .map(|ext| {
                    serde_json::json!({
                        "extension": ext.extension(),
                        "raster": ext.is_raster(),
                        "alpha": ext.supports_alpha(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&formats)?);
            Ok(ExitCode::SUCCESS)
        }
        TopLevelCommand::Convert(args) => run_convert(args),
    }
}

fn run_convert(args: ConvertArgs) -> Result<ExitCode> {
    let inputs = resolve_inputs(&args)?;
    if inputs.is_empty() {
        return Err(anyhow!("no input images matched"));
    }

    let settings = resolve_settings(
        default_output_dir(),
        SettingsOverrides {
            output_dir: args.output_dir.clone(),
            target_extension: args.format.clone(),
            convert_extension: Some(!args.keep_format),
            max_width: args.max_width,
            max_height: args.max_height,
            limit_size: Some(!args.no_resize),
            file_name_prefix: args.prefix.clone(),
            add_prefix: Some(!args.no_prefix),
        },
    )?;
    let requests = plan_requests(&inputs, &settings)?;

    if args.dry_run {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "settings": settings,
                "planned": requests,
            }))?
        );
        return Ok(ExitCode::SUCCESS);
    }

    ensure_output_dir(&settings.output_dir)
        .with_context(|| format!("creating output directory {}", settings.output_dir.display()))?;

    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    let quiet = args.quiet;
    let log_progress = move |progress: &BatchProgress| {
        if !quiet {
            eprintln!("[{:>3.0}%] {}", progress.fraction() * 100.0, progress.message);
        }
    };
    let policy = if args.strict {
        FailurePolicy::Abort
    } else {
        FailurePolicy::Continue
    };

    let report = run_batch(&requests, policy, Some(&log_progress), telemetry_ref);

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "settings": settings,
            "results": report.outcomes,
            "succeeded": report.succeeded,
            "failed": report.failed,
            "skipped": report.skipped,
        }))?
    );

    if args.strict && report.failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn resolve_inputs(args: &ConvertArgs) -> Result<Vec<PathBuf>> {
    let candidate = PathBuf::from(&args.input);
    if candidate.exists() {
        if candidate.is_dir() {
            return collect_images(&candidate, args.recursive, None);
        }
        return Ok(vec![candidate]);
    }
    // Not a path on disk: treat as a file-name regex under input_root.
    let root = match args.input_root.clone() {
        Some(root) => root,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let re = Regex::new(&args.input).map_err(|e| anyhow!("invalid regex: {}", e))?;
    collect_images(&root, args.recursive, Some(&re))
}

fn collect_images(root: &Path, recursive: bool, name_filter: Option<&Regex>) -> Result<Vec<PathBuf>> {
    let walker = if recursive {
        WalkDir::new(root)
    } else {
        WalkDir::new(root).max_depth(1)
    };
    let mut out = Vec::new();
    for entry in walker.into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.into_path();
        if !is_allowed_input(&p) {
            continue;
        }
        if let Some(re) = name_filter {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !re.is_match(name) {
                continue;
            }
        }
        out.push(p);
    }
    out.sort();
    Ok(out)
}
