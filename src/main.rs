// VisionScribe CLI binary

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use visionscribe::api::models::documents::{
    AnalysisDocument, BuildSummary, JsonDocument, OcrDocument, OutputFormat, ANALYSIS_FILE, OCR_DATA_FILE,
};
use visionscribe::api::VisionScribe;
use visionscribe::core::config::{VisionConfig, DEFAULT_CONFIG_FILE};

const ENV_FILE: &str = ".env";

#[derive(Parser)]
#[command(name = "visionscribe")]
#[command(about = "VisionScribe - turn screen recordings into source projects", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./visionscribe.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and .env template
    Init {
        /// Project directory
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Extract and deduplicate frames from a video
    Frames {
        /// Input video file
        input: PathBuf,
        /// Output directory (frames land in <output>/frames)
        #[arg(default_value = "./output")]
        output: PathBuf,
        /// Frame sampling rate
        #[arg(long)]
        fps: Option<f64>,
    },

    /// Recognize text in a directory of frame images
    Ocr {
        /// Directory of frame images
        frames_dir: PathBuf,
        /// Output JSON file
        #[arg(short, long, default_value = OCR_DATA_FILE)]
        output: PathBuf,
        /// OCR languages, comma separated (e.g. eng,chi_sim)
        #[arg(long)]
        languages: Option<String>,
        /// Minimum OCR confidence (0-1)
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Cluster recognized text into unique snippets
    Analyze {
        /// OCR JSON produced by `ocr`
        input: PathBuf,
        /// Output JSON file
        #[arg(short, long, default_value = ANALYSIS_FILE)]
        output: PathBuf,
    },

    /// Reconstruct project files from an analysis
    Build {
        /// Analysis JSON produced by `analyze`
        input: PathBuf,
        /// Output directory
        output: PathBuf,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Code)]
        format: OutputFormat,
        /// Model override
        #[arg(long)]
        model: Option<String>,
    },

    /// Run every stage from video to project
    Run {
        /// Input video file
        input: PathBuf,
        /// Output directory
        #[arg(default_value = "./output")]
        output: PathBuf,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Code)]
        format: OutputFormat,
        /// Frame sampling rate
        #[arg(long)]
        fps: Option<f64>,
        /// OCR languages, comma separated
        #[arg(long)]
        languages: Option<String>,
        /// Model override
        #[arg(long)]
        model: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    visionscribe::init_logging(cli.verbose);

    match cli.command {
        Commands::Init { dir, force } => cmd_init(&dir, force),
        Commands::Frames { input, output, fps } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(fps) = fps {
                config.video.fps = fps;
            }
            cmd_frames(config, &input, &output)
        }
        Commands::Ocr {
            frames_dir,
            output,
            languages,
            confidence,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_languages(&mut config, languages.as_deref());
            if let Some(confidence) = confidence {
                config.ocr.confidence_threshold = confidence;
            }
            cmd_ocr(config, &frames_dir, &output)
        }
        Commands::Analyze { input, output } => cmd_analyze(load_config(cli.config.as_deref())?, &input, &output),
        Commands::Build {
            input,
            output,
            format,
            model,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(model) = model {
                config.ai.model = model;
            }
            cmd_build(config, &input, &output, format)
        }
        Commands::Run {
            input,
            output,
            format,
            fps,
            languages,
            model,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(fps) = fps {
                config.video.fps = fps;
            }
            apply_languages(&mut config, languages.as_deref());
            if let Some(model) = model {
                config.ai.model = model;
            }
            cmd_run(config, &input, &output, format)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<VisionConfig> {
    match path {
        Some(path) => {
            VisionConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => VisionConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE))
            .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_FILE)),
    }
}

fn apply_languages(config: &mut VisionConfig, languages: Option<&str>) {
    if let Some(languages) = languages {
        config.ocr.languages = languages
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
    }
}

fn cmd_init(dir: &Path, force: bool) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let config_path = dir.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
    }
    let config = VisionConfig::default();
    config.save(&config_path)?;

    let env_path = dir.join(ENV_FILE);
    if !env_path.exists() || force {
        let template = format!("# VisionScribe Configuration\n{}=your_api_key_here\n", config.ai.api_key_env);
        fs::write(&env_path, template).with_context(|| format!("Failed to write {}", env_path.display()))?;
    }

    println!("📁 Configuration created in {}:", dir.display());
    println!("  📄 {}: Project configuration", DEFAULT_CONFIG_FILE);
    println!("  🔑 {}: Environment variables", ENV_FILE);
    Ok(())
}

fn cmd_frames(config: VisionConfig, input: &Path, output: &Path) -> Result<()> {
    let scribe = VisionScribe::create(config)?;
    let document = scribe
        .extract_frames(input, output)
        .with_context(|| format!("Frame extraction failed for {}", input.display()))?;

    println!(
        "✅ Kept {} unique frames out of {} sampled",
        document.unique_frames(),
        document.sampled_frames
    );
    if let Some(first) = document.frames.first().and_then(|f| f.file_path.as_ref()) {
        if let Some(dir) = first.parent() {
            println!("📁 Frames saved in: {}", dir.display());
        }
    }
    Ok(())
}

fn cmd_ocr(config: VisionConfig, frames_dir: &Path, output: &Path) -> Result<()> {
    let scribe = VisionScribe::create(config)?;
    let document = scribe
        .recognize_frames(frames_dir, scribe.recognizer())
        .with_context(|| format!("OCR failed for {}", frames_dir.display()))?;
    if document.total_frames == 0 {
        anyhow::bail!("No frames found in {}", frames_dir.display());
    }
    document.save(output)?;

    println!("✅ OCR data saved to {}", output.display());
    println!(
        "📊 {} text blocks from {} of {} frames ({} skipped)",
        document.blocks.len(),
        document.frames_with_text,
        document.total_frames,
        document.skipped.len()
    );
    Ok(())
}

fn cmd_analyze(config: VisionConfig, input: &Path, output: &Path) -> Result<()> {
    let scribe = VisionScribe::create(config)?;
    let ocr = OcrDocument::load(input).with_context(|| format!("Failed to read OCR data {}", input.display()))?;
    let analysis = scribe.analyze(&ocr)?;
    analysis.save(output)?;

    println!("✅ Analysis saved to {}", output.display());
    println!(
        "🎯 {} blocks → {} unique snippets ({} dropped)",
        analysis.total_blocks,
        analysis.clusters.len(),
        analysis.dropped.len()
    );
    Ok(())
}

fn cmd_build(config: VisionConfig, input: &Path, output: &Path, format: OutputFormat) -> Result<()> {
    let scribe = VisionScribe::create(config)?;
    let analysis =
        AnalysisDocument::load(input).with_context(|| format!("Failed to read analysis {}", input.display()))?;
    let reconstructor = scribe.reconstructor()?;
    let summary = scribe.build(&analysis, output, format, reconstructor)?;
    print_summary(&summary);
    Ok(())
}

fn cmd_run(config: VisionConfig, input: &Path, output: &Path, format: OutputFormat) -> Result<()> {
    let scribe = VisionScribe::create(config)?;
    let reconstructor = scribe.reconstructor()?;
    let summary = scribe
        .run(input, output, format, scribe.recognizer(), reconstructor)
        .with_context(|| format!("Processing failed for {}", input.display()))?;

    if let Some(report) = &summary.report {
        println!(
            "📊 {} frames → {} unique → {} text blocks → {} snippets",
            report.sampled_frames, report.retained_frames, report.recognized_blocks, report.clusters
        );
        for skipped in &report.skipped {
            println!("  ⚠️ skipped {} ({}): {}", skipped.item, skipped.stage, skipped.reason);
        }
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &BuildSummary) {
    println!(
        "🎉 Built '{}' with {} files ({} bytes)",
        summary.project_name, summary.files_generated, summary.total_size
    );
    for path in &summary.outputs {
        println!("  📁 {}", path.display());
    }
}
