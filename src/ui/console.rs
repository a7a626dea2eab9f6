use indicatif::{ProgressBar, ProgressStyle};

use super::{Phase, Ui};

/// Line-oriented terminal output, with a progress bar when asked for one
pub struct ConsoleUi {
    progbar: bool,
    quiet: bool,
    bar: Option<ProgressBar>,
    style: ProgressStyle,
}

impl ConsoleUi {
    pub fn new(progbar: bool) -> Self {
        let style = ProgressStyle::with_template("{msg:30} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        Self {
            progbar,
            quiet: false,
            bar: None,
            style,
        }
    }

    /// Only log lines and the final summary are printed
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    fn print(&self, line: &str) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }
}

impl Ui for ConsoleUi {
    fn set_phase(&mut self, phase: Phase) {
        if !self.quiet {
            self.print(&format!("==> {}", phase));
        }
    }

    fn set_info(&mut self, info: impl Into<String>) {
        if !self.quiet {
            self.print(&format!("    {}", info.into()));
        }
    }

    fn set_progress(&mut self, current: u64, total: u64, label: impl Into<String>) {
        if !self.progbar {
            return;
        }
        let style = self.style.clone();
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total);
            bar.set_style(style);
            bar
        });
        bar.set_length(total);
        bar.set_position(current);
        bar.set_message(label.into());
    }

    fn clear_progress(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn log(&mut self, message: impl Into<String>) {
        self.print(&message.into());
    }
}
