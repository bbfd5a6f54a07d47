use {
    anyhow::Result,
    std::{
        fs::{File, OpenOptions, create_dir_all},
        io::Write,
        path::PathBuf,
        str::FromStr,
        sync::{
            Arc, Mutex,
            atomic::{AtomicU8, Ordering},
        },
        time::{SystemTime, UNIX_EPOCH},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Debug => write!(f, "DEBUG"),
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
            Level::Fatal => write!(f, "FATAL"),
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, level: Level, file: &str, line: usize, message: &str);
}

pub static LOGGER: Mutex<Option<Box<dyn Logger>>> = Mutex::new(None);

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Debug as u8);

/// Drop every message below `level`.
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level as u8 >= MAX_LEVEL.load(Ordering::Relaxed)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn format_timestamp() -> String {
    let secs = unix_seconds();
    let (year, month, day) = civil_from_days((secs / 86400) as i64);
    let time_of_day = secs % 86400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        year,
        month,
        day,
        time_of_day / 3600,
        (time_of_day % 3600) / 60,
        time_of_day % 60
    )
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// Format a single log line the same way for every sink.
pub fn format_line(level: Level, file: &str, line: usize, message: &str) -> String {
    format!(
        "[{}:{} - {}:{}] {}",
        level,
        format_timestamp(),
        file,
        line,
        message
    )
}

pub struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, level: Level, file: &str, line: usize, message: &str) {
        println!("{}", format_line(level, file, line, message));
    }
}

pub fn init_stdout_logger() {
    install(Box::new(StdoutLogger));
}

/// Appends every line to `<dir>/<run>.log`.
pub struct FileLogger {
    file: Mutex<File>,
    path: PathBuf,
}

impl FileLogger {
    pub fn new(dir: impl Into<PathBuf>, run: &str) -> Result<Self> {
        let dir = dir.into();
        create_dir_all(&dir)?;
        let path = dir.join(format!("{run}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Logger for FileLogger {
    fn log(&self, level: Level, file: &str, line: usize, message: &str) {
        let log_line = format_line(level, file, line, message);
        let mut handle = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(error) = writeln!(handle, "{}", log_line) {
            eprintln!("Failed to write to log file {:?}: {}", self.path, error);
            eprintln!("{}", log_line);
        }
    }
}

pub fn init_file_logger(dir: impl Into<PathBuf>, run: &str) -> Result<()> {
    install(Box::new(FileLogger::new(dir, run)?));
    Ok(())
}

/// Keeps formatted lines in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemoryLogger {
    lines: Arc<Mutex<Vec<(Level, String)>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: Level, _file: &str, _line: usize, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}

pub fn install(logger: Box<dyn Logger>) {
    LOGGER
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .replace(logger);
}

#[doc(hidden)]
pub fn dispatch(level: Level, file: &str, line: usize, message: &str) {
    if !enabled(level) {
        return;
    }
    if let Some(logger) = LOGGER.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
        logger.log(level, file, line, message);
    }
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{ $crate::log::dispatch($crate::log::Level::Debug, file!(), line!() as usize, &format_args!($($arg)*).to_string()); }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{ $crate::log::dispatch($crate::log::Level::Info, file!(), line!() as usize, &format_args!($($arg)*).to_string()); }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{ $crate::log::dispatch($crate::log::Level::Warn, file!(), line!() as usize, &format_args!($($arg)*).to_string()); }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{ $crate::log::dispatch($crate::log::Level::Error, file!(), line!() as usize, &format_args!($($arg)*).to_string()); }};
}

#[macro_export]
macro_rules! log_fatal {
    ($($arg:tt)*) => {{ let message = format_args!($($arg)*).to_string(); $crate::log::dispatch($crate::log::Level::Fatal, file!(), line!() as usize, &message); println!("FATAL ERROR: {}", message); std::process::exit(1); }};
}
