//! Colored terminal output shared by the commands
//!
//! Uses `termcolor`; honours `NO_COLOR` and the `--color` flag.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tapestry_weaver::Violation;

/// Resolve the color choice from the CLI flag and environment
///
/// `NO_COLOR` wins over `--color`, which wins over TTY detection.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    fn write_styled(&mut self, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    fn badge(&mut self, text: &str, background: Color, foreground: Color) {
        let mut spec = ColorSpec::new();
        spec.set_bg(Some(background)).set_fg(Some(foreground)).set_bold(true);
        let _ = self.stdout.set_color(&spec);
        let _ = write!(self.stdout, " {} ", text);
        let _ = self.stdout.reset();
    }

    pub fn success(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Green), true);
    }

    pub fn error(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Red), true);
    }

    pub fn warning(&mut self, text: &str) {
        self.write_styled(text, Some(Color::Yellow), true);
    }

    pub fn dim(&mut self, text: &str) {
        self.write_styled(text, Some(Color::White), false);
    }

    pub fn bold(&mut self, text: &str) {
        self.write_styled(text, None, true);
    }

    pub fn plain(&mut self, text: &str) {
        let _ = write!(self.stdout, "{}", text);
    }

    pub fn newline(&mut self) {
        let _ = writeln!(self.stdout);
    }

    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    /// Raw JSON document on stdout
    pub fn json(&mut self, value: &serde_json::Value) -> anyhow::Result<()> {
        writeln!(self.stdout, "{}", serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    // ── Badges ───────────────────────────────────────────────────────

    pub fn ok_badge(&mut self) {
        self.badge("OK", Color::Green, Color::White);
    }

    pub fn woven_badge(&mut self) {
        self.badge("WOVEN", Color::Cyan, Color::Black);
    }

    pub fn fail_badge(&mut self) {
        self.badge("FAIL", Color::Red, Color::White);
    }

    pub fn skip_badge(&mut self) {
        self.badge("SKIP", Color::Yellow, Color::Black);
    }

    /// One violation per line, indented under its heading
    pub fn violations(&mut self, violations: &[Violation]) {
        for violation in violations {
            self.plain("    ");
            self.error(&violation.kind.name());
            self.plain(&format!(" {}", violation.kind.message()));
            self.dim(&format!(" [{}", violation.weave_class));
            if let Some(candidate) = &violation.candidate_class {
                self.dim(&format!(" -> {}", candidate));
            }
            if let Some(member) = &violation.member {
                self.dim(&format!(" {}", member));
            }
            self.dim("]");
            if let Some(detail) = &violation.detail {
                self.plain(&format!(" ({})", detail));
            }
            self.newline();
        }
    }

    /// Error message on stderr
    pub fn stderr_error(&mut self, text: &str) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Red)).set_bold(true);
        let _ = self.stderr.set_color(&spec);
        let _ = write!(self.stderr, "error");
        let _ = self.stderr.reset();
        let _ = writeln!(self.stderr, ": {}", text);
    }
}
