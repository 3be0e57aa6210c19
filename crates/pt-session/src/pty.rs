use std::io::{Read as IoRead, Write as IoWrite};
use std::path::{Path, PathBuf};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Capacity, in chunks, of the reader and writer channels.
const CHANNEL_CAPACITY: usize = 256;
const READ_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("shell not found: {}", .0.display())]
    ShellNotFound(PathBuf),

    #[error("shell is not executable: {}", .0.display())]
    ShellNotExecutable(PathBuf),

    #[error("pty process already started")]
    AlreadyStarted,

    #[error("pty spawn failed: {0}")]
    SpawnFailed(String),

    #[error("session registry is at capacity ({max})")]
    AtCapacity { max: usize },

    #[error("terminal is not running")]
    NotRunning,

    #[error("invalid terminal dimensions {rows}x{cols}")]
    InvalidDimensions { rows: u16, cols: u16 },

    #[error("pty I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty internal error: {0}")]
    Internal(String),
}

impl PtyError {
    /// Errors raised before anything was registered or spawned.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            PtyError::ShellNotFound(_)
                | PtyError::ShellNotExecutable(_)
                | PtyError::AlreadyStarted
                | PtyError::SpawnFailed(_)
                | PtyError::AtCapacity { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PtyError>;

// ---------------------------------------------------------------------------
// Spawn options
// ---------------------------------------------------------------------------

/// Environment applied to every shell a [`PtyProcess`] spawns.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub term: String,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            term: "xterm-256color".into(),
            working_dir: None,
            env: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// PtyProcess
// ---------------------------------------------------------------------------

/// Resources that exist only between a successful start and a stop.
struct Running {
    master: Box<dyn portable_pty::MasterPty + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    pid: Option<u32>,
    exited: bool,
    output: flume::Receiver<Vec<u8>>,
    input: flume::Sender<Vec<u8>>,
    _reader_thread: std::thread::JoinHandle<()>,
    _writer_thread: std::thread::JoinHandle<()>,
}

/// One pseudo-terminal pair plus the shell running on its terminal side.
///
/// The master side and the child never leave this struct. Output is pulled
/// off the master by a reader thread into a bounded channel, so
/// [`PtyProcess::read_available`] never blocks. Input goes through a writer
/// thread for the same reason.
pub struct PtyProcess {
    options: SpawnOptions,
    rows: u16,
    cols: u16,
    running: Option<Running>,
}

impl PtyProcess {
    pub fn new() -> Self {
        Self::with_options(SpawnOptions::default())
    }

    pub fn with_options(options: SpawnOptions) -> Self {
        Self {
            options,
            rows: 24,
            cols: 80,
            running: None,
        }
    }

    /// Spawn `shell` on a fresh pty sized `rows` x `cols`.
    ///
    /// The shell path is checked before any OS resource is allocated. Every
    /// handle acquired on the way is owned by a local until the very end, so
    /// an early return drops (and closes) whatever was already opened.
    pub fn start(&mut self, shell: &Path, rows: u16, cols: u16) -> Result<()> {
        if self.running.is_some() {
            return Err(PtyError::AlreadyStarted);
        }
        if rows == 0 || cols == 0 {
            return Err(PtyError::InvalidDimensions { rows, cols });
        }
        let shell = resolve_shell(shell)?;

        let pair = native_pty_system()
            .openpty(pty_size(rows, cols))
            .map_err(|e| PtyError::SpawnFailed(format!("openpty: {e}")))?;

        let mut command = CommandBuilder::new(&shell);
        command.env("TERM", &self.options.term);
        for (k, v) in &self.options.env {
            command.env(k, v);
        }
        if let Some(dir) = &self.options.working_dir {
            command.cwd(dir);
        }

        let mut child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        // The parent keeps no handle on the terminal side.
        drop(pair.slave);
        let pid = child.process_id();

        let io = spawn_io_threads(pair.master.as_ref());
        let (output, input, reader_thread, writer_thread) = match io {
            Ok(parts) => parts,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        info!(shell = %shell.display(), ?pid, rows, cols, "pty process started");

        self.rows = rows;
        self.cols = cols;
        self.running = Some(Running {
            master: pair.master,
            child,
            pid,
            exited: false,
            output,
            input,
            _reader_thread: reader_thread,
            _writer_thread: writer_thread,
        });
        Ok(())
    }

    /// Queue raw bytes for the shell's standard input. No-op when not started.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(running) = self.running.as_ref() else {
            return Ok(());
        };
        if data.is_empty() {
            return Ok(());
        }
        running.input.try_send(data.to_vec()).map_err(|e| match e {
            flume::TrySendError::Full(_) => PtyError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "pty input queue is full",
            )),
            flume::TrySendError::Disconnected(_) => PtyError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pty writer has exited",
            )),
        })
    }

    /// Ask the pty driver for a new window size. Stored dimensions change
    /// only when the driver accepts it; no-op when not started.
    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<()> {
        if rows == 0 || cols == 0 {
            return Err(PtyError::InvalidDimensions { rows, cols });
        }
        let Some(running) = self.running.as_ref() else {
            return Ok(());
        };
        running
            .master
            .resize(pty_size(rows, cols))
            .map_err(|e| PtyError::Internal(format!("resize failed: {e}")))?;
        self.rows = rows;
        self.cols = cols;
        debug!(rows, cols, "pty resized");
        Ok(())
    }

    /// Everything the reader thread has collected so far. Never blocks.
    pub fn read_available(&mut self) -> Vec<u8> {
        let Some(running) = self.running.as_ref() else {
            return Vec::new();
        };
        let mut buf = Vec::new();
        while let Ok(chunk) = running.output.try_recv() {
            buf.extend_from_slice(&chunk);
        }
        buf
    }

    /// Whether the shell is still alive.
    ///
    /// An exited child is reaped here and remembered, so its pid is never
    /// signalled again afterwards.
    pub fn is_running(&mut self) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        if running.exited {
            return false;
        }
        match running.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = ?running.pid, ?status, "pty child exited");
                running.exited = true;
                false
            }
            Err(e) => {
                warn!(pid = ?running.pid, "pty liveness check failed: {e}");
                false
            }
        }
    }

    /// Kill the child, reap it and close the master. Safe to call from any
    /// state and any number of times.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        if !running.exited {
            kill_now(&mut running);
            match running.child.wait() {
                Ok(status) => debug!(pid = ?running.pid, ?status, "pty child reaped"),
                Err(e) => warn!(pid = ?running.pid, "failed to reap pty child: {e}"),
            }
        }

        // Dropping the sender ends the writer thread; dropping the master
        // closes the host side of the pair.
        drop(running.input);
        drop(running.master);
        info!(pid = ?running.pid, "pty process stopped");
    }

    /// Whether the terminal line discipline currently echoes input. `None`
    /// when not started or when the platform cannot tell.
    pub fn echo_enabled(&self) -> Option<bool> {
        let running = self.running.as_ref()?;
        terminal_echo(running.master.as_ref())
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|r| r.pid)
    }

    /// True between a successful start and a stop, even if the child exited.
    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }
}

impl Default for PtyProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid())
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("started", &self.is_started())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[cfg(unix)]
fn kill_now(running: &mut Running) {
    // portable-pty's own kill sends SIGHUP and waits; this must not wait.
    if let Some(pid) = running.pid {
        // SAFETY: the child has not been reaped yet, so the pid still
        // belongs to it.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            return;
        }
        debug!(pid, "SIGKILL failed: {}", std::io::Error::last_os_error());
    }
    let _ = running.child.kill();
}

#[cfg(not(unix))]
fn kill_now(running: &mut Running) {
    let _ = running.child.kill();
}

#[cfg(unix)]
fn terminal_echo(master: &(dyn portable_pty::MasterPty + Send)) -> Option<bool> {
    let fd = master.as_raw_fd()?;
    // SAFETY: termios is plain old data and tcgetattr fully initializes it
    // on success; the fd stays open while `master` is borrowed.
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
        debug!("tcgetattr failed: {}", std::io::Error::last_os_error());
        return None;
    }
    Some(termios.c_lflag & libc::ECHO != 0)
}

#[cfg(not(unix))]
fn terminal_echo(_master: &(dyn portable_pty::MasterPty + Send)) -> Option<bool> {
    None
}

type IoParts = (
    flume::Receiver<Vec<u8>>,
    flume::Sender<Vec<u8>>,
    std::thread::JoinHandle<()>,
    std::thread::JoinHandle<()>,
);

fn spawn_io_threads(master: &(dyn portable_pty::MasterPty + Send)) -> Result<IoParts> {
    let mut reader = master
        .try_clone_reader()
        .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
    let mut writer = master
        .take_writer()
        .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

    // -- output reader thread --
    let (read_tx, read_rx) = flume::bounded::<Vec<u8>>(CHANNEL_CAPACITY);
    let reader_thread = std::thread::Builder::new()
        .name("pty-reader".into())
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if read_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO is how Linux reports that the terminal side closed.
                        debug!("pty reader finished: {e}");
                        break;
                    }
                }
            }
        })?;

    // -- input writer thread --
    let (write_tx, write_rx) = flume::bounded::<Vec<u8>>(CHANNEL_CAPACITY);
    let writer_thread = std::thread::Builder::new()
        .name("pty-writer".into())
        .spawn(move || {
            while let Ok(data) = write_rx.recv() {
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    debug!("pty writer finished: {e}");
                    break;
                }
            }
        })?;

    Ok((read_rx, write_tx, reader_thread, writer_thread))
}

/// Find the shell on disk and check it can be executed.
fn resolve_shell(shell: &Path) -> Result<PathBuf> {
    let candidate = if shell.components().count() == 1 && !shell.is_absolute() {
        search_path(shell).ok_or_else(|| PtyError::ShellNotFound(shell.to_path_buf()))?
    } else {
        shell.to_path_buf()
    };

    let metadata = match std::fs::metadata(&candidate) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PtyError::ShellNotFound(candidate));
        }
        Err(_) => return Err(PtyError::ShellNotExecutable(candidate)),
    };
    if !metadata.is_file() || !is_executable(&metadata) {
        return Err(PtyError::ShellNotExecutable(candidate));
    }
    Ok(candidate)
}

fn search_path(name: &Path) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}
