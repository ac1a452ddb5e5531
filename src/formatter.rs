use crate::{
    protocol::{JobProgress, RealtimeFeatures, RealtimePrediction, RecordingUpdate},
    stream::StreamSnapshot,
};

// ANSI color codes
pub struct Colors;

impl Colors {
    pub const RESET: &'static str = "\x1b[0m";
    pub const BOLD: &'static str = "\x1b[1m";
    pub const DIM: &'static str = "\x1b[2m";

    // Colors
    pub const RED: &'static str = "\x1b[31m";
    pub const GREEN: &'static str = "\x1b[32m";
    pub const YELLOW: &'static str = "\x1b[33m";
    pub const BLUE: &'static str = "\x1b[34m";
    pub const MAGENTA: &'static str = "\x1b[35m";
    pub const CYAN: &'static str = "\x1b[36m";
    pub const WHITE: &'static str = "\x1b[37m";
    pub const GRAY: &'static str = "\x1b[90m";

    // Bright colors
    pub const BRIGHT_RED: &'static str = "\x1b[91m";
    pub const BRIGHT_GREEN: &'static str = "\x1b[92m";
    pub const BRIGHT_YELLOW: &'static str = "\x1b[93m";
    pub const BRIGHT_BLUE: &'static str = "\x1b[94m";
    pub const BRIGHT_MAGENTA: &'static str = "\x1b[95m";
    pub const BRIGHT_CYAN: &'static str = "\x1b[96m";
    pub const BRIGHT_WHITE: &'static str = "\x1b[97m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Minimal,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "minimal" => OutputFormat::Minimal,
            _ => OutputFormat::Table,
        }
    }
}

const BAR_WIDTH: usize = 40;

/// Bar of `width` cells filled in proportion to `percent` (0 to 100).
pub fn band_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

pub struct LiveFormatter {
    format: OutputFormat,
    colored: bool,
    quiet: bool,
}

impl LiveFormatter {
    pub fn new(format: OutputFormat, colored: bool, quiet: bool) -> Self {
        Self {
            format,
            colored,
            quiet,
        }
    }

    fn paint(&self, color: &'static str) -> &'static str {
        if self.colored { color } else { "" }
    }

    pub fn format_bands(&self, snapshot: &StreamSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "type": "bands",
                "insertions": snapshot.insertions,
                "recomputations": snapshot.recomputations,
                "window": snapshot.points.len(),
                "capacity": snapshot.capacity,
                "rate_hz": snapshot.rate_hz,
                "bands": &*snapshot.metrics,
            })
            .to_string(),
            OutputFormat::Minimal => snapshot
                .metrics
                .iter()
                .map(|m| format!("{}={:.1}", m.name, m.power))
                .collect::<Vec<_>>()
                .join(" "),
            OutputFormat::Table => {
                let gray = self.paint(Colors::GRAY);
                let reset = self.paint(Colors::RESET);
                let bar_color = self.paint(Colors::BRIGHT_CYAN);

                let mut output = format!(
                    "{}{}[BANDS]{} window {}/{} | samples {} | recompute #{}\n",
                    self.paint(Colors::BOLD),
                    self.paint(Colors::BRIGHT_BLUE),
                    reset,
                    snapshot.points.len(),
                    snapshot.capacity,
                    snapshot.insertions,
                    snapshot.recomputations
                );
                for metric in snapshot.metrics.iter() {
                    output.push_str(&format!(
                        "  {:<6} {}{}{} {}{:>5.1}%{}\n",
                        metric.name,
                        bar_color,
                        band_bar(metric.power, BAR_WIDTH),
                        reset,
                        gray,
                        metric.power,
                        reset
                    ));
                }
                output
            }
        }
    }

    pub fn print_bands(&self, snapshot: &StreamSnapshot) {
        print!("{}", self.format_bands(snapshot));
        if self.format != OutputFormat::Table {
            println!();
        }
    }

    pub fn format_job_progress(&self, progress: &JobProgress) -> String {
        if self.format == OutputFormat::Json {
            return serde_json::json!({ "type": "job_progress", "job": progress }).to_string();
        }

        let color = if progress.is_finished() {
            self.paint(Colors::BRIGHT_GREEN)
        } else {
            self.paint(Colors::BRIGHT_YELLOW)
        };
        let mut line = format!(
            "{}[JOB {}]{} {}{:>5.1}%{} {}",
            self.paint(Colors::BOLD),
            progress.job_id,
            self.paint(Colors::RESET),
            color,
            progress.progress,
            self.paint(Colors::RESET),
            band_bar(progress.progress, 20)
        );
        if let Some(step) = &progress.step {
            line.push_str(&format!(" {step}"));
        }
        if let Some(status) = &progress.status {
            line.push_str(&format!(" ({status})"));
        }
        if let Some(model_id) = &progress.model_id {
            line.push_str(&format!(" -> model {model_id}"));
        }
        line
    }

    pub fn format_recording_update(&self, update: &RecordingUpdate) -> String {
        if self.format == OutputFormat::Json {
            return serde_json::json!({ "type": "recording_update", "update": update }).to_string();
        }
        format!(
            "{}{}[RECORDING {}]{} {}",
            self.paint(Colors::BOLD),
            self.paint(Colors::BRIGHT_MAGENTA),
            update.recording_id,
            self.paint(Colors::RESET),
            update.status.as_deref().unwrap_or("updated")
        )
    }

    pub fn format_features(&self, features: &RealtimeFeatures) -> String {
        if self.format == OutputFormat::Json {
            return serde_json::json!({ "type": "features", "features": features }).to_string();
        }
        let mut names: Vec<_> = features.features.iter().collect();
        names.sort_by(|a, b| a.0.cmp(b.0));
        let body = names
            .iter()
            .take(8)
            .map(|(name, value)| format!("{name}={value:.3}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{}[FEATURES {}]{} {} feature(s) {}{}{}",
            self.paint(Colors::CYAN),
            features.recording_id,
            self.paint(Colors::RESET),
            features.features.len(),
            self.paint(Colors::DIM),
            body,
            self.paint(Colors::RESET)
        )
    }

    pub fn format_prediction(&self, prediction: &RealtimePrediction) -> String {
        if self.format == OutputFormat::Json {
            return serde_json::json!({ "type": "prediction", "prediction": prediction }).to_string();
        }
        format!(
            "{}{}[PREDICTION {}]{} class {} with p={:.3}",
            self.paint(Colors::BOLD),
            self.paint(Colors::BRIGHT_GREEN),
            prediction.recording_id,
            self.paint(Colors::RESET),
            prediction.prediction,
            prediction.probability
        )
    }

    pub fn print_line(&self, line: &str) {
        if self.quiet && self.format == OutputFormat::Table {
            return;
        }
        println!("{}", line);
    }

    pub fn print_summary(&self, samples: u64, recomputations: u64, duration_secs: u64) {
        if self.quiet {
            return;
        }

        let rate = if duration_secs > 0 {
            samples as f64 / duration_secs as f64
        } else {
            0.0
        };

        println!();
        println!(
            "{}{}Summary: {} samples, {} band updates in {}s ({:.2} samples/sec){}",
            self.paint(Colors::BOLD),
            self.paint(Colors::BRIGHT_CYAN),
            samples,
            recomputations,
            duration_secs,
            rate,
            self.paint(Colors::RESET)
        );
    }
}
