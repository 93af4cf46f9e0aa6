//! Configuration validation.

use url::Url;

use crate::config::model::{AppConfig, DisplayConfig};

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Blocks configuration loading.
    Error,
    /// Logged but allows loading.
    Warning,
}

/// A validation issue found during configuration checking.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue.
    pub severity: ValidationSeverity,
    /// Path to the problematic config field (e.g., "player.display.width").
    pub path: String,
    /// Description of the issue.
    pub message: String,
    /// Optional suggestion for fixing the issue.
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Creates a new error-level validation issue.
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Error,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Creates a new warning-level validation issue.
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Warning,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Adds a suggestion to this validation issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Result of validating a configuration.
#[derive(Debug, Default)]
pub struct ValidationResult {
    issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Creates an empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Adds an issue to the result.
    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Returns true if there are no errors (warnings are allowed).
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == ValidationSeverity::Error)
    }

    /// Returns an iterator over error-level issues.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Error)
    }

    /// Returns an iterator over warning-level issues.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Warning)
    }

    /// Returns the number of errors.
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }
}

/// External tools found on this machine.
#[derive(Debug, Clone)]
pub struct SystemCapabilities {
    /// Tools that were looked up and not found on `PATH`.
    pub missing_tools: Vec<String>,
}

impl SystemCapabilities {
    /// Looks up every external tool the configuration names.
    pub fn detect(config: &AppConfig) -> Self {
        let tools = [
            config.worker.downloader.as_str(),
            config.worker.ffmpeg.as_str(),
            config.player.player_command.as_str(),
        ];

        let missing_tools = tools
            .iter()
            .filter(|tool| which_binary(tool).is_none())
            .map(|tool| tool.to_string())
            .collect();

        Self { missing_tools }
    }

    /// Capabilities with every tool present. Used when detection is skipped.
    pub fn all_present() -> Self {
        Self {
            missing_tools: Vec::new(),
        }
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        !self.missing_tools.iter().any(|t| t == tool)
    }
}

/// Resolves a binary name against `PATH`. Paths containing a separator are checked directly.
pub fn which_binary(name: &str) -> Option<std::path::PathBuf> {
    let candidate = std::path::Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}

/// Validates the configuration against system capabilities.
pub fn validate_config(config: &AppConfig, capabilities: &SystemCapabilities) -> ValidationResult {
    let mut result = ValidationResult::new();

    let worker = &config.worker;
    if worker.listen_port == 0 {
        result.add(ValidationIssue::error("worker.listen_port", "Port must be non-zero"));
    }
    if worker.max_url_length == 0 {
        result.add(ValidationIssue::error(
            "worker.max_url_length",
            "Maximum url length must be non-zero",
        ));
    }
    validate_extension(&worker.video_extension, "worker.video_extension", &mut result);
    validate_display(&worker.display, "worker.display", &mut result);

    let player = &config.player;
    if player.listen_port == 0 {
        result.add(ValidationIssue::error("player.listen_port", "Port must be non-zero"));
    }
    match Url::parse(&player.worker_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => result.add(ValidationIssue::error(
            "player.worker_url",
            format!("Unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => result.add(
            ValidationIssue::error("player.worker_url", format!("Invalid url: {}", e))
                .with_suggestion("Use a full base url such as http://127.0.0.1:8090"),
        ),
    }
    validate_extension(&player.video_extension, "player.video_extension", &mut result);
    validate_display(&player.display, "player.display", &mut result);

    if player.poll.tick_ms == 0 || player.poll.ticks_per_check == 0 {
        result.add(ValidationIssue::error(
            "player.poll",
            "tick_ms and ticks_per_check must both be non-zero",
        ));
    }
    if player.stop.poll_interval_ms == 0 || player.stop.poll_attempts == 0 {
        result.add(ValidationIssue::error(
            "player.stop",
            "poll_interval_ms and poll_attempts must both be non-zero",
        ));
    }
    if player.cache_sweep_interval_secs == 0 {
        result.add(ValidationIssue::error(
            "player.cache_sweep_interval_secs",
            "Sweep interval must be non-zero",
        ));
    }
    if player.stop.force_kill_grace_ms > 60_000 {
        result.add(ValidationIssue::warning(
            "player.stop.force_kill_grace_ms",
            "Grace period above one minute delays every replaced playback",
        ));
    }

    for (path, tool) in [
        ("worker.downloader", &worker.downloader),
        ("worker.ffmpeg", &worker.ffmpeg),
        ("player.player_command", &player.player_command),
    ] {
        if !capabilities.has_tool(tool) {
            result.add(
                ValidationIssue::warning(path, format!("'{}' was not found on PATH", tool))
                    .with_suggestion("Install it or point the setting at an absolute path"),
            );
        }
    }

    result
}

fn validate_display(display: &DisplayConfig, path: &str, result: &mut ValidationResult) {
    if display.width == 0 || display.height == 0 {
        result.add(ValidationIssue::error(
            format!("{}.width", path),
            "Display dimensions must be non-zero",
        ));
    } else if display.width % 2 != 0 {
        result.add(
            ValidationIssue::error(
                format!("{}.width", path),
                "Display width must be even so mirrored output can be split in half",
            )
            .with_suggestion(format!("Use {}", display.width + 1)),
        );
    }
}

fn validate_extension(extension: &str, path: &str, result: &mut ValidationResult) {
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        result.add(ValidationIssue::error(
            path,
            format!("'{}' is not a plain file extension", extension),
        ));
    }
}
