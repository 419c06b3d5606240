// Spinners and log output share the terminal. Log lines go through
// `LogWriter`, which hides the active spinner while a line is written and
// redraws it afterwards.

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Log writer for the `tracing` subscriber that cooperates with the
/// spinner currently on screen.
#[derive(Clone)]
pub struct LogWriter {
    active: Arc<Mutex<Option<ProgressBar>>>,
    sink: Sink,
}

/// A running spinner; cleared from the terminal when dropped.
pub struct Spinner {
    bar: ProgressBar,
    active: Arc<Mutex<Option<ProgressBar>>>,
}

impl LogWriter {
    pub fn stderr() -> Self {
        Self::to(Box::new(io::stderr()))
    }

    pub fn to(sink: Box<dyn Write + Send>) -> Self {
        LogWriter {
            active: Arc::new(Mutex::new(None)),
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Start a ticking spinner that log lines will be written around.
    pub fn spinner(&self, message: &str) -> Spinner {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        self.attach(bar, message)
    }

    fn attach(&self, bar: ProgressBar, message: &str) -> Spinner {
        bar.set_message(message.to_string());
        *self.active.lock() = Some(bar.clone());
        Spinner {
            bar,
            active: self.active.clone(),
        }
    }

    fn has_spinner(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.active.lock().take();
        self.bar.finish_and_clear();
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let active = self.active.lock().clone();
        match active {
            Some(bar) => bar.suspend(|| self.sink.lock().write(buf)),
            None => self.sink.lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
