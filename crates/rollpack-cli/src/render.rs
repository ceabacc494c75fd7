use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use rollpack_core::PackageState;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(std::io::stdout().is_terminal())
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, badge_style) = match status {
                "ok" => ("[OK]", ok_style()),
                "warn" => ("[WARN]", warn_style()),
                "err" => ("[ERR]", err_style()),
                _ => ("[..]", Style::new()),
            };
            format!("{} {message}", colorize(badge_style, badge))
        }
    }
}

pub(crate) fn print_status(style: OutputStyle, status: &str, message: &str) {
    println!("{}", render_status_line(style, status, message));
}

/// Spinner shown while `--wait` polls the daemon. Silent in plain mode.
pub(crate) struct WaitProgress {
    style: OutputStyle,
    label: String,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl WaitProgress {
    pub(crate) fn start(style: OutputStyle, label: &str) -> Self {
        let progress_bar = if style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(spinner) =
                ProgressStyle::with_template("{spinner:.cyan.bold} {prefix} {msg} {elapsed_precise}")
            {
                progress_bar.set_style(spinner.tick_chars("|/-\\ "));
            }
            progress_bar.set_prefix(label.to_string());
            progress_bar.set_message(PackageState::ExperimentStarting.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        Self {
            style,
            label: label.to_string(),
            progress_bar,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn set_state(&self, state: PackageState) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_message(state.to_string());
        }
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };
        progress_bar.finish_and_clear();
        print_status(
            self.style,
            "ok",
            &format!(
                "{} running after {}",
                self.label,
                format_elapsed(self.started_at.elapsed())
            ),
        );
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn ok_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightGreen.into()))
        .effects(Effects::BOLD)
}

fn warn_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightYellow.into()))
        .effects(Effects::BOLD)
}

fn err_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
