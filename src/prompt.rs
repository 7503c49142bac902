use std::io::{self, BufRead, Write};
use std::path::Path;

/// Yes/no gate asked once per file that survived every other filter.
pub trait Confirm {
    fn confirm(&mut self, path: &Path) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&Path) -> bool,
{
    fn confirm(&mut self, path: &Path) -> bool {
        self(path)
    }
}

/// Asks on the controlling terminal, blocking until a valid answer.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

// empty answer means yes
fn parse_answer(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "" | "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

impl<R: BufRead, W: Write> Confirm for TerminalPrompt<R, W> {
    fn confirm(&mut self, path: &Path) -> bool {
        loop {
            let _ = write!(self.output, "Add {} to playlist? [Y/n]: ", path.display());
            let _ = self.output.flush();

            let mut line = String::new();
            match self.input.read_line(&mut line) {
                // EOF or a dead terminal: nothing more can be confirmed
                Ok(0) | Err(_) => {
                    log::warn!("No answer for {:?}, skipping it", path);
                    return false;
                }
                Ok(_) => {}
            }

            match parse_answer(&line) {
                Some(answer) => return answer,
                None => {
                    let _ = writeln!(self.output, "Please answer y or n.");
                }
            }
        }
    }
}
