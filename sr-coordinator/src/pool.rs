//! Worker launch and the per-worker command channels.

use std::io::{BufWriter, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command as Process, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use sr_core::WorkerSlot;
use sr_proto::{
    read_reply, write_command, write_command_buf, write_init, Command, ProtoError, Reply,
    WorkerInit,
};
use sr_worker::{run_worker, WorkerError};

use crate::CoordinatorError;

/// How worker instances are started.
#[derive(Debug, Clone)]
pub enum Launcher {
    /// `exe args..` as a child process. Commands go to its stdin, replies come from its
    /// stdout, diagnostics stay on the inherited stderr.
    Process { exe: PathBuf, args: Vec<String> },
    /// In-process threads over a socket pair. Same protocol and shared memory path.
    Thread,
}

impl Launcher {
    /// Re-run the current executable with `worker`.
    pub fn current_exe() -> Result<Self, CoordinatorError> {
        Ok(Launcher::Process {
            exe: std::env::current_exe()?,
            args: vec!["worker".to_string()],
        })
    }
}

enum Exit {
    Process(Child),
    Thread(JoinHandle<Result<(), WorkerError>>),
}

struct WorkerHandle {
    index: usize,
    slot: WorkerSlot,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    /// Encode scratch, reused by every command sent to this worker.
    buf: Vec<u8>,
    exit: Option<Exit>,
    disconnected: bool,
}

/// How a worker ended, for the exit event.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerExit {
    pub worker: usize,
    pub slot: WorkerSlot,
    pub ok: bool,
    pub disconnected: bool,
    pub error: Option<String>,
}

impl WorkerExit {
    pub fn status(&self) -> &'static str {
        match (self.ok, self.disconnected) {
            (true, _) => "ok",
            (false, true) => "disconnected",
            (false, false) => "failed",
        }
    }
}

/// One channel per worker, in slot order.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    closed: bool,
}

impl WorkerPool {
    /// Start one worker per init and hand each its handshake.
    pub fn spawn(launcher: &Launcher, inits: Vec<WorkerInit>) -> Result<Self, CoordinatorError> {
        let mut pool = Self {
            workers: Vec::with_capacity(inits.len()),
            closed: false,
        };
        for init in inits {
            let mut handle = start(launcher, &init)?;
            let worker = init.worker;
            // A worker that dies before reading its init shows up as a broken pipe here.
            write_init(&mut handle.writer, &init).map_err(|e| proto_err(worker, e))?;
            pool.workers.push(handle);
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn slots(&self) -> Vec<WorkerSlot> {
        self.workers.iter().map(|w| w.slot).collect()
    }

    pub fn send(&mut self, worker: usize, cmd: &Command) -> Result<(), CoordinatorError> {
        let h = &mut self.workers[worker];
        let res = write_command_buf(&mut h.writer, cmd, &mut h.buf);
        h.check(res)
    }

    pub fn broadcast(&mut self, cmd: &Command) -> Result<(), CoordinatorError> {
        for w in 0..self.workers.len() {
            self.send(w, cmd)?;
        }
        Ok(())
    }

    pub fn recv(&mut self, worker: usize) -> Result<Reply, CoordinatorError> {
        let h = &mut self.workers[worker];
        let res = read_reply(&mut h.reader);
        h.check(res)
    }

    /// Send `Close` to every live worker and reap them. Idempotent.
    pub fn shutdown(&mut self) -> Vec<WorkerExit> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        for h in &mut self.workers {
            if !h.disconnected {
                let _ = write_command(&mut h.writer, &Command::Close);
            }
        }
        self.workers.iter_mut().map(WorkerHandle::reap).collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for exit in self.shutdown() {
            if !exit.ok {
                log::warn!(
                    "worker {} (slot {}..{}) exited {}: {}",
                    exit.worker,
                    exit.slot.start,
                    exit.slot.end,
                    exit.status(),
                    exit.error.as_deref().unwrap_or("-")
                );
            }
        }
    }
}

impl WorkerHandle {
    fn check<T>(&mut self, res: Result<T, ProtoError>) -> Result<T, CoordinatorError> {
        res.map_err(|e| {
            if e.is_disconnect() {
                self.disconnected = true;
            }
            proto_err(self.index, e)
        })
    }

    fn reap(&mut self) -> WorkerExit {
        let mut exit = WorkerExit {
            worker: self.index,
            slot: self.slot,
            ok: false,
            disconnected: self.disconnected,
            error: None,
        };
        // Dropping both ends lets a worker still blocked on a read see EOF.
        self.writer = Box::new(std::io::sink());
        self.reader = Box::new(std::io::empty());
        match self.exit.take() {
            Some(Exit::Process(mut child)) => match child.wait() {
                Ok(status) => {
                    exit.ok = status.success() && !self.disconnected;
                    exit.error = (!status.success()).then(|| describe(status));
                }
                Err(e) => exit.error = Some(e.to_string()),
            },
            Some(Exit::Thread(join)) => match join.join() {
                Ok(Ok(())) => exit.ok = !self.disconnected,
                Ok(Err(e)) => exit.error = Some(e.to_string()),
                Err(_) => exit.error = Some("worker thread panicked".to_string()),
            },
            None => exit.error = Some("already reaped".to_string()),
        }
        exit
    }
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => format!("terminated: {status}"),
    }
}

fn proto_err(worker: usize, e: ProtoError) -> CoordinatorError {
    if e.is_disconnect() {
        CoordinatorError::WorkerDisconnected { worker }
    } else {
        CoordinatorError::Protocol { worker, source: e }
    }
}

fn start(launcher: &Launcher, init: &WorkerInit) -> Result<WorkerHandle, CoordinatorError> {
    let worker = init.worker;
    let spawn_err = |source| CoordinatorError::Spawn { worker, source };
    match launcher {
        Launcher::Process { exe, args } => {
            let mut child = Process::new(exe)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(spawn_err)?;
            let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_err(std::io::Error::other("worker pipes unavailable")));
            };
            Ok(WorkerHandle {
                index: worker,
                slot: init.slot,
                reader: Box::new(stdout),
                writer: Box::new(BufWriter::new(stdin)),
                buf: Vec::new(),
                exit: Some(Exit::Process(child)),
                disconnected: false,
            })
        }
        Launcher::Thread => {
            let (ours, theirs) = UnixStream::pair().map_err(spawn_err)?;
            let mut theirs_r = theirs.try_clone().map_err(spawn_err)?;
            let mut theirs_w = theirs;
            let join = thread::Builder::new()
                .name(format!("sr-worker-{worker}"))
                .spawn(move || run_worker(&mut theirs_r, &mut theirs_w))
                .map_err(spawn_err)?;
            let reader = ours.try_clone().map_err(spawn_err)?;
            Ok(WorkerHandle {
                index: worker,
                slot: init.slot,
                reader: Box::new(reader),
                writer: Box::new(ours),
                buf: Vec::new(),
                exit: Some(Exit::Thread(join)),
                disconnected: false,
            })
        }
    }
}
