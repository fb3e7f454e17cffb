// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::collections::BTreeMap;

use crate::{
    config::{self, Output},
    media::Catalog,
    surface::Display,
};

/// Severity level for a verification issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A single verification issue found during checking.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub category: &'static str,
    pub output_name: String,
    pub message: String,
}

/// Result of verifying a player configuration.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub issues: Vec<Issue>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: VerificationReport) {
        self.issues.extend(other.issues);
    }
}

/// Checks every pair of enabled outputs for channel groups that share a channel.
pub fn check_channel_groups(outputs: &[Output]) -> Vec<Issue> {
    let groups: Vec<_> = outputs
        .iter()
        .enumerate()
        .filter(|(_, output)| output.enabled())
        .filter_map(|(i, output)| output.group().ok().map(|group| (output.name(i), group)))
        .collect();

    let mut issues = Vec::new();
    for (i, (name, group)) in groups.iter().enumerate() {
        for (other_name, other) in groups.iter().skip(i + 1) {
            if group.overlaps(other) {
                issues.push(Issue {
                    severity: Severity::Error,
                    category: "channels",
                    output_name: name.clone(),
                    message: format!("channels {} overlap \"{}\" on {}", group, other_name, other),
                });
            }
        }
    }
    issues
}

/// Checks an output's media folder. Unreadable folders are errors, an empty
/// catalog or a selector claimed by more than one file is a warning.
pub fn check_catalog(output_name: &str, folder: &std::path::Path) -> Vec<Issue> {
    let issue = |severity, message| Issue {
        severity,
        category: "media",
        output_name: output_name.to_string(),
        message,
    };

    let catalog = match Catalog::try_scan(folder) {
        Ok(catalog) => catalog,
        Err(e) => {
            return vec![issue(
                Severity::Error,
                format!("media folder {} is unreadable: {}", folder.display(), e),
            )]
        }
    };

    if catalog.is_empty() {
        return vec![issue(
            Severity::Warning,
            format!("media folder {} has no numbered media", folder.display()),
        )];
    }

    catalog
        .duplicates()
        .into_iter()
        .map(|(selector, media)| {
            let names: Vec<&str> = media.iter().map(|media| media.filename()).collect();
            issue(
                Severity::Warning,
                format!(
                    "selector {:03} matches {}; only \"{}\" will play",
                    selector,
                    names.join(", "),
                    names.first().copied().unwrap_or_default()
                ),
            )
        })
        .collect()
}

/// Checks that an output's display exists among the known displays.
pub fn check_display(output_name: &str, output: &Output, displays: &[Display]) -> Vec<Issue> {
    let target = output.display();
    if target.0 < displays.len() {
        return Vec::new();
    }
    vec![Issue {
        severity: Severity::Warning,
        category: "display",
        output_name: output_name.to_string(),
        message: format!(
            "display {} is not among the {} known display(s); the primary display will be used",
            target.0 + 1,
            displays.len()
        ),
    }]
}

/// Runs every check against a player configuration.
pub fn verify(config: &config::Player) -> VerificationReport {
    let displays = config.surface().displays();
    let mut report = VerificationReport {
        issues: check_channel_groups(config.outputs()),
    };
    for (i, output) in config.outputs().iter().enumerate() {
        let name = output.name(i);
        report.merge(VerificationReport {
            issues: check_catalog(&name, &output.media_folder()),
        });
        report.merge(VerificationReport {
            issues: check_display(&name, output, &displays),
        });
    }
    report
}

/// Prints a verification report grouped by output name.
pub fn print_report(report: &VerificationReport, config: &config::Player) {
    let outputs = config.outputs().len();
    if report.is_clean() {
        println!("\u{2705} All {} output(s) passed verification.", outputs);
        return;
    }

    // Group issues by output name.
    let mut by_output: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
    for issue in &report.issues {
        by_output.entry(&issue.output_name).or_default().push(issue);
    }

    let clean_count = config
        .outputs()
        .iter()
        .enumerate()
        .filter(|(i, output)| !by_output.contains_key(output.name(*i).as_str()))
        .count();

    for (output_name, issues) in &by_output {
        let has_errors = issues.iter().any(|i| i.severity == Severity::Error);
        let icon = if has_errors {
            "\u{274c}"
        } else {
            "\u{26a0}\u{fe0f} "
        };
        println!("{} {}", icon, output_name);
        for issue in issues {
            let severity_icon = match issue.severity {
                Severity::Warning => "\u{26a0}\u{fe0f} ",
                Severity::Error => "\u{274c}",
            };
            println!(
                "   {} [{}] {}",
                severity_icon, issue.category, issue.message
            );
        }
    }

    if clean_count > 0 {
        println!("\n\u{2705} {} output(s) passed all checks.", clean_count);
    }

    println!(
        "\nSummary: {} issue(s) found across {} output(s).",
        report.issues.len(),
        by_output.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{error::Error, fs::File};

    use tempfile::tempdir;

    use crate::config::{Surface, SurfaceKind};

    #[test]
    fn test_check_channel_groups() {
        let outputs = vec![
            Output::new(1, "/a").with_name("Left"),
            Output::new(3, "/b").with_name("Right"),
        ];
        let issues = check_channel_groups(&outputs);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].output_name, "Left");
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[0].category, "channels");
        assert!(issues[0].message.contains("Right"));

        let outputs = vec![Output::new(1, "/a"), Output::new(4, "/b")];
        assert!(check_channel_groups(&outputs).is_empty());
    }

    #[test]
    fn test_check_channel_groups_ignores_disabled() {
        let outputs = vec![
            Output::new(1, "/a"),
            Output::new(2, "/b").with_enabled(false),
        ];
        assert!(check_channel_groups(&outputs).is_empty());
    }

    #[test]
    fn test_check_catalog() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let issues = check_catalog("Left", dir.path());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(issues[0].message.contains("no numbered media"));

        File::create(dir.path().join("001_a.mp4"))?;
        assert!(check_catalog("Left", dir.path()).is_empty());

        File::create(dir.path().join("001_b.mp4"))?;
        let issues = check_catalog("Left", dir.path());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, "media");
        assert!(issues[0].message.contains("only \"001_a.mp4\" will play"));

        let issues = check_catalog("Left", &dir.path().join("missing"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
        Ok(())
    }

    #[test]
    fn test_check_display() {
        let displays = vec![Display::fallback()];
        assert!(check_display("Left", &Output::new(1, "/a"), &displays).is_empty());

        let issues = check_display("Left", &Output::new(1, "/a").with_display(2), &displays);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, "display");
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_verify() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        File::create(dir.path().join("001_a.mp4"))?;
        let folder = dir.path().to_string_lossy().to_string();
        let config = config::Player::new(
            vec![
                Output::new(1, &folder).with_name("Left"),
                Output::new(2, &dir.path().join("missing").to_string_lossy()).with_name("Right"),
            ],
            Surface::new(SurfaceKind::Mock, vec![Display::fallback()]),
        );

        let report = verify(&config);
        assert!(!report.is_clean());
        assert!(report.has_errors());
        let categories: Vec<(&str, &str)> = report
            .issues
            .iter()
            .map(|issue| (issue.output_name.as_str(), issue.category))
            .collect();
        assert_eq!(vec![("Left", "channels"), ("Right", "media")], categories);
        Ok(())
    }

    #[test]
    fn test_report_merge() {
        let mut report = VerificationReport::default();
        assert!(report.is_clean());
        report.merge(VerificationReport {
            issues: vec![Issue {
                severity: Severity::Warning,
                category: "media",
                output_name: "Left".to_string(),
                message: "empty".to_string(),
            }],
        });
        assert!(!report.is_clean());
        assert!(!report.has_errors());
    }
}
