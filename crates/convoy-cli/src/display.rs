//! Display formatting for CLI output
//!
//! Renders the deploy event stream:
//! - log lines prefixed by their cluster
//! - resource and cluster status transitions with status symbols
//! - overall cluster progress as a progress bar

use console::style;
use convoy_kube::{DeployEvent, LogLevel, Phase, ProgressSnapshot, Status, StatusEvent};
use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.blue} [{bar:30.cyan/blue}] {pos}/{len} clusters {msg}";

pub struct EventDisplay {
    debug: bool,
    bar: Option<ProgressBar>,
}

impl EventDisplay {
    pub fn new(debug: bool) -> Self {
        Self { debug, bar: None }
    }

    pub fn render(&mut self, event: &DeployEvent) {
        match event {
            DeployEvent::Log {
                level,
                cluster,
                message,
            } => {
                if *level == LogLevel::Debug && !self.debug {
                    return;
                }
                self.print(format_log(*level, cluster.as_deref(), message));
            }
            DeployEvent::Status(status) => self.print(format_status(status)),
            DeployEvent::Progress(snapshot) => self.progress(snapshot),
        }
    }

    /// Clear the progress bar once the stream has ended
    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn print(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }

    fn progress(&mut self, snapshot: &ProgressSnapshot) {
        let clusters = &snapshot.clusters;
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(clusters.total as u64);
            if let Ok(template) = ProgressStyle::with_template(BAR_TEMPLATE) {
                bar.set_style(template.progress_chars("=> "));
            }
            bar
        });
        bar.set_length(clusters.total as u64);
        bar.set_position(clusters.completed as u64);
        bar.set_message(progress_message(snapshot));
    }
}

pub fn format_log(level: LogLevel, cluster: Option<&str>, message: &str) -> String {
    let icon = match level {
        LogLevel::Debug => style("·").dim(),
        LogLevel::Info => style("→").blue(),
        LogLevel::Warn => style("⚠").yellow(),
        LogLevel::Error => style("✗").red(),
    };
    match cluster {
        Some(cluster) => format!("{} {} {}", icon, style(format!("[{cluster}]")).cyan(), message),
        None => format!("{icon} {message}"),
    }
}

pub fn format_status(event: &StatusEvent) -> String {
    let icon = match (event.phase, event.status) {
        (Phase::Started, _) => style("▶").blue().bold(),
        (Phase::Completed, Status::Success) => style("✓").green().bold(),
        (Phase::Completed, _) => style("✗").red().bold(),
    };
    let what = if event.is_cluster() {
        format!("cluster {}", style(&event.name).bold())
    } else {
        format!("{} {}", event.kind, style(&event.name).bold())
    };
    let outcome = match (event.phase, event.status) {
        (Phase::Started, _) => "started".to_string(),
        (Phase::Completed, Status::Success) => "completed".to_string(),
        (Phase::Completed, _) => match &event.reason {
            Some(reason) => format!("failed ({reason})"),
            None => "failed".to_string(),
        },
    };
    format!(
        "{} {} {} {}",
        icon,
        style(format!("[{}]", event.cluster)).cyan(),
        what,
        outcome
    )
}

fn progress_message(snapshot: &ProgressSnapshot) -> String {
    let clusters = &snapshot.clusters;
    let mut message = format!("{:.0}%", snapshot.percent * 100.0);
    if !clusters.failed.is_empty() {
        message.push_str(&format!(
            ", {}",
            style(format!("failed: {}", clusters.failed.join(", "))).red()
        ));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_kube::{CLUSTER_KIND, ClusterCounters};
    use serde_json::json;

    fn strip(s: &str) -> String {
        console::strip_ansi_codes(s).into_owned()
    }

    fn status(kind: &str, phase: Phase, status: Status, reason: Option<&str>) -> StatusEvent {
        StatusEvent {
            cluster: "east".to_string(),
            name: "web".to_string(),
            kind: kind.to_string(),
            phase,
            status,
            manifest: json!({}),
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn test_format_log_with_cluster() {
        let line = strip(&format_log(LogLevel::Warn, Some("east"), "slow"));
        assert_eq!(line, "⚠ [east] slow");
        let line = strip(&format_log(LogLevel::Info, None, "hello"));
        assert_eq!(line, "→ hello");
    }

    #[test]
    fn test_format_status() {
        let started = strip(&format_status(&status(
            "Deployment",
            Phase::Started,
            Status::InProgress,
            None,
        )));
        assert_eq!(started, "▶ [east] Deployment web started");

        let failed = strip(&format_status(&status(
            "Deployment",
            Phase::Completed,
            Status::Failure,
            Some("TimeoutError"),
        )));
        assert_eq!(failed, "✗ [east] Deployment web failed (TimeoutError)");

        let cluster = strip(&format_status(&status(
            CLUSTER_KIND,
            Phase::Completed,
            Status::Success,
            None,
        )));
        assert_eq!(cluster, "✓ [east] cluster web completed");
    }

    #[test]
    fn test_progress_message() {
        let snapshot = ProgressSnapshot {
            percent: 0.5,
            clusters: ClusterCounters {
                total: 2,
                completed: 1,
                failed: vec!["west".to_string()],
                ..Default::default()
            },
        };
        assert_eq!(strip(&progress_message(&snapshot)), "50%, failed: west");
    }
}
