use crate::models::{LeadRow, ScanStatus};
use crossterm::{
    cursor::MoveToPreviousLine,
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io;

/// Terminal progress display for a scan. One line per finished address
/// plus a progress line at the bottom that is rewritten in place.
pub struct ScanTui {
    total: usize,
    progress_line_printed: bool,
}

impl ScanTui {
    pub fn new() -> Self {
        Self {
            total: 0,
            progress_line_printed: false,
        }
    }

    pub fn start_scan(&mut self, total: usize, jurisdiction: &str) -> io::Result<()> {
        self.total = total;
        self.progress_line_printed = false;
        execute!(
            io::stdout(),
            SetForegroundColor(Color::White),
            Print(format!(
                "🏠 Scanning {} addresses in {}\n",
                total, jurisdiction
            )),
            ResetColor
        )?;
        Ok(())
    }

    /// Append the finished address line, then redraw the progress line
    /// underneath it.
    pub fn row_done(&mut self, row: &LeadRow, done: usize, good: usize) -> io::Result<()> {
        if self.progress_line_printed {
            execute!(
                io::stdout(),
                MoveToPreviousLine(1),
                Clear(ClearType::CurrentLine),
            )?;
        }

        let (color, icon, detail) = if row.status == "OK" {
            let detail = if row.roof_date_used.is_empty() {
                "roof permit, age unknown".to_string()
            } else {
                format!("roof {} ({}y)", row.roof_date_used, row.roof_years)
            };
            if row.is_20plus == "True" {
                (Color::Green, "✅", detail)
            } else {
                (Color::White, "🔎", detail)
            }
        } else if row.status.starts_with("ERROR") {
            (Color::Red, "❌", row.status.clone())
        } else {
            (Color::DarkGrey, "·", "no roofing permit".to_string())
        };

        execute!(
            io::stdout(),
            SetForegroundColor(color),
            Print(format!(
                "  {} {} — {} [{}s]\n",
                icon,
                truncate(&row.address, 48),
                detail,
                row.seconds
            )),
            ResetColor
        )?;

        self.print_progress_line(done, good)?;
        self.progress_line_printed = true;
        Ok(())
    }

    pub fn finish(&mut self, status: &ScanStatus) -> io::Result<()> {
        if self.progress_line_printed {
            execute!(
                io::stdout(),
                MoveToPreviousLine(1),
                Clear(ClearType::FromCursorDown),
            )?;
            self.progress_line_printed = false;
        }

        execute!(
            io::stdout(),
            Print("─".repeat(72)),
            Print("\n"),
            SetForegroundColor(Color::Green),
            Print(format!(
                "✅ Scan finished: {}/{} addresses, {} leads 20y+\n",
                status.done, status.total, status.good
            )),
            ResetColor
        )?;
        Ok(())
    }

    fn print_progress_line(&self, done: usize, good: usize) -> io::Result<()> {
        let total = self.total.max(1);
        let percentage = (done * 100) / total;
        let bar_width = 30;
        let filled = (done * bar_width) / total;
        let bar = format!("[{}{}]", "█".repeat(filled), "░".repeat(bar_width - filled));

        execute!(
            io::stdout(),
            SetForegroundColor(Color::White),
            Print(format!(
                "Progress: {} {}/{} ({}%) | {} leads 20y+\n",
                bar, done, self.total, percentage, good
            )),
            ResetColor
        )?;
        Ok(())
    }
}

impl Default for ScanTui {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    } else {
        s.to_string()
    }
}
