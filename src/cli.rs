use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Deserialize;

use crate::analysis::{PerformanceReport, Priority, Verdict};
use crate::error::{ExperimentError, Result};
use crate::model::{CampaignRef, ContentRef, ExperimentConfig, ExperimentId, Metadata, ResultEntry, UserRef};
use crate::service::{ContentCandidate, ExperimentService, Outcome};
use crate::store::ExperimentStore;

#[derive(Parser, Debug)]
#[command(name = "content-experiments")]
#[command(version)]
#[command(about = "Run and analyse A/B tests over marketing content")]
pub struct Args {
    /// SQLite database file (overrides the config's storage section)
    #[arg(long, global = true, env = "EXPERIMENTS_DB")]
    pub db: Option<PathBuf>,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "EXPERIMENTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// User recorded as the actor of mutating commands
    #[arg(long, global = true, env = "EXPERIMENTS_ACTOR", default_value = "cli")]
    pub actor: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by `create` and `bulk-create`.
#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct ExperimentSettings {
    #[arg(long)]
    pub name: String,

    /// Owning campaign or content plan
    #[arg(long)]
    pub campaign: String,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Primary goal metric the winner is judged on
    #[arg(long, default_value = "click_rate")]
    pub goal: String,

    /// Target confidence level in percent
    #[arg(long, default_value_t = 95)]
    pub confidence: u8,

    /// Experiment-wide sample size required before completion
    #[arg(long, default_value_t = 1000)]
    pub min_samples: u64,

    /// Planned duration in days
    #[arg(long, default_value_t = 14)]
    pub days: u32,

    /// Share of the audience enrolled in the experiment, in percent
    #[arg(long, default_value_t = 100.0)]
    pub allocation: f64,
}

impl ExperimentSettings {
    pub fn into_config(self, control: ContentRef) -> ExperimentConfig {
        ExperimentConfig {
            name: self.name,
            campaign: CampaignRef::new(self.campaign),
            description: self.description,
            primary_goal: self.goal,
            confidence_level: self.confidence,
            minimum_sample_size: self.min_samples,
            duration_days: self.days,
            traffic_allocation: self.allocation,
            control_content: control,
            metadata: Metadata::new(),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a draft experiment with its control content
    Create {
        #[command(flatten)]
        settings: ExperimentSettings,

        /// Content reference of the control
        #[arg(long)]
        control: String,
    },

    /// Create an experiment from a content list: first is control, the rest split traffic evenly
    BulkCreate {
        #[command(flatten)]
        settings: ExperimentSettings,

        #[arg(required = true, num_args = 2..)]
        candidates: Vec<String>,
    },

    /// Add a variant to a draft experiment
    AddVariant {
        id: ExperimentId,
        content_ref: String,

        #[arg(long)]
        name: String,

        /// Traffic split in percent
        #[arg(long)]
        split: f64,
    },

    /// Start a draft experiment
    Start {
        id: ExperimentId,

        /// RFC 3339 start timestamp (defaults to now)
        #[arg(long)]
        start_date: Option<DateTime<Utc>>,
    },

    Pause {
        id: ExperimentId,
        #[arg(long, default_value = "")]
        reason: String,
    },

    Resume {
        id: ExperimentId,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Stop an experiment early
    Stop {
        id: ExperimentId,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Complete an experiment that reached its minimum sample size
    Complete { id: ExperimentId },

    /// Record a JSON batch of results
    Record {
        id: ExperimentId,

        /// Batch file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print the performance report
    Report {
        id: ExperimentId,

        #[arg(long)]
        json: bool,
    },

    /// List experiments
    List,

    /// Delete an experiment with its variants and samples
    Delete { id: ExperimentId },
}

// ---------------------------------------------------------------------------
// Batch input
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchInput {
    Entries(Vec<ResultEntry>),
    Wrapped { results: Vec<ResultEntry> },
}

/// Parse a result batch: either a bare JSON array of entries or
/// `{"results": [...]}`.
pub fn parse_batch(raw: &str) -> Result<Vec<ResultEntry>> {
    let input: BatchInput = serde_json::from_str(raw)?;
    Ok(match input {
        BatchInput::Entries(entries) | BatchInput::Wrapped { results: entries } => entries,
    })
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn verdict_label(verdict: &Verdict) -> ColoredString {
    match verdict {
        Verdict::InsufficientData => "insufficient data".yellow(),
        Verdict::Inconclusive => "inconclusive".yellow(),
        Verdict::VariantWins { variant_name, .. } => format!("{variant_name} wins").bright_green().bold(),
        Verdict::ControlHolds => "control holds".bright_blue().bold(),
    }
}

fn priority_label(priority: Priority) -> ColoredString {
    match priority {
        Priority::High => "HIGH".bright_red().bold(),
        Priority::Medium => "MEDIUM".bright_yellow(),
        Priority::Low => "LOW".normal(),
    }
}

/// Human-readable report for terminals.
pub fn render_report(report: &PerformanceReport) -> String {
    let mut out = String::new();
    let summary = &report.test_summary;
    out.push_str(&format!(
        "{} {} [{}]\n",
        format!("Experiment {}:", summary.experiment_id).bright_cyan().bold(),
        summary.name,
        summary.status
    ));
    out.push_str(&format!(
        "  {}: {} @ {}%   {}: {}%   {}: {}/{} ({:.0}%)   {}: {}\n",
        "goal".bright_yellow(),
        summary.primary_goal,
        summary.confidence_level,
        "traffic".bright_yellow(),
        summary.traffic_allocation,
        "samples".bright_yellow(),
        summary.total_sample_size,
        summary.minimum_sample_size,
        summary.sample_progress,
        "days running".bright_yellow(),
        summary.days_running
    ));

    let control_metrics = report.current_results.control.as_ref().map(|c| &c.metrics);
    out.push_str(&format!("{}\n", "Arms".bold()));
    let arms = report.current_results.control.iter().chain(report.current_results.variants.iter());
    for arm in arms {
        let tag = if arm.is_control { " (control)" } else { "" };
        out.push_str(&format!(
            "  {}{}  {}  n={}\n",
            arm.variant_name.bright_white(),
            tag,
            arm.traffic_split,
            arm.sample_size
        ));
        for (metric, agg) in &arm.metrics {
            let versus = control_metrics
                .filter(|_| !arm.is_control)
                .and_then(|m| m.get(metric))
                .filter(|c| c.average.abs() > f64::EPSILON)
                .map(|c| format!("  ({:+.1}% vs control)", (agg.average - c.average) / c.average.abs() * 100.0))
                .unwrap_or_default();
            out.push_str(&format!(
                "      {metric}  avg {:.3}  rows {}  obs {}{versus}\n",
                agg.average, agg.count, agg.observations
            ));
        }
    }

    let winner = &report.winner;
    let achieved = winner
        .confidence_achieved
        .map(|c| format!("{c:.1}%"))
        .unwrap_or_else(|| "n/a".to_string());
    out.push_str(&format!(
        "{}: {} (confidence {achieved}, target {}%)\n",
        "Verdict".bold(),
        verdict_label(&winner.verdict),
        winner.confidence_target
    ));

    if !report.recommendations.is_empty() {
        out.push_str(&format!("{}\n", "Recommendations".bold()));
        for rec in &report.recommendations {
            out.push_str(&format!("  [{}] {}\n", priority_label(rec.priority), rec.message));
        }
    }
    out
}

fn write_outcome<T>(out: &mut dyn Write, outcome: &Outcome<T>, describe: impl FnOnce(&T) -> String) -> Result<bool> {
    match &outcome.value {
        Some(value) if outcome.success => {
            writeln!(out, "{} {}", "ok".bright_green().bold(), describe(value))?;
            Ok(true)
        }
        _ => {
            for error in &outcome.errors {
                writeln!(out, "{} {error}", "rejected:".bright_red().bold())?;
            }
            Ok(false)
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Execute one command. Returns `false` when the operation was rejected with
/// validation errors.
pub fn run<S: ExperimentStore>(
    service: &ExperimentService<S>,
    command: Command,
    actor: &UserRef,
    out: &mut dyn Write,
) -> Result<bool> {
    let status_line = |agg: &crate::model::ExperimentAggregate| {
        format!("experiment {} is {}", agg.id(), agg.experiment.status)
    };
    match command {
        Command::Create { settings, control } => {
            let outcome = service.create_experiment(settings.into_config(ContentRef::new(control)), actor)?;
            write_outcome(out, &outcome, |agg| format!("created experiment {}", agg.id()))
        }
        Command::BulkCreate { settings, candidates } => {
            let candidates: Vec<ContentCandidate> = candidates.into_iter().map(ContentCandidate::new).collect();
            let control = candidates.first().map(|c| c.content_ref.clone()).unwrap_or_else(|| ContentRef::new(""));
            let outcome = service.bulk_create_from_content_list(candidates, settings.into_config(control), actor)?;
            write_outcome(out, &outcome, |agg| {
                format!("created experiment {} with {} variants", agg.id(), agg.treatments().count())
            })
        }
        Command::AddVariant { id, content_ref, name, split } => {
            let outcome = service.add_variant(id, ContentRef::new(content_ref), &name, split, actor)?;
            write_outcome(out, &outcome, |v| format!("added variant {} ({}) at {}", v.id, v.name, v.traffic_split))
        }
        Command::Start { id, start_date } => write_outcome(out, &service.start(id, start_date, actor)?, status_line),
        Command::Pause { id, reason } => write_outcome(out, &service.pause(id, &reason, actor)?, status_line),
        Command::Resume { id, reason } => write_outcome(out, &service.resume(id, &reason, actor)?, status_line),
        Command::Stop { id, reason } => write_outcome(out, &service.stop(id, &reason, actor)?, status_line),
        Command::Complete { id } => write_outcome(out, &service.complete(id, actor)?, status_line),
        Command::Record { id, file } => {
            let raw = match file {
                Some(path) => std::fs::read_to_string(path)?,
                None => std::io::read_to_string(std::io::stdin())?,
            };
            let outcome = service.record_results(id, parse_batch(&raw)?)?;
            writeln!(out, "{} {} recorded, {} skipped", "ok".bright_green().bold(), outcome.recorded, outcome.skipped.len())?;
            for skipped in &outcome.skipped {
                writeln!(
                    out,
                    "  {} entry {} (variant {}, {}): {}",
                    "skipped".yellow(),
                    skipped.index,
                    skipped.variant_id,
                    skipped.metric_name,
                    skipped.reason
                )?;
            }
            Ok(true)
        }
        Command::Report { id, json } => {
            let report = service.generate_performance_report(id)?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            } else {
                write!(out, "{}", render_report(&report))?;
            }
            Ok(true)
        }
        Command::List => {
            for experiment in service.list_experiments()? {
                writeln!(
                    out,
                    "{:>5}  {:<10} {}  ({})",
                    experiment.id.0,
                    experiment.status.as_str(),
                    experiment.name,
                    experiment.campaign
                )?;
            }
            Ok(true)
        }
        Command::Delete { id } => {
            if service.delete_experiment(id, actor)? {
                writeln!(out, "{} deleted experiment {id}", "ok".bright_green().bold())?;
                Ok(true)
            } else {
                Err(ExperimentError::ExperimentNotFound(id))
            }
        }
    }
}
