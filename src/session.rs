//! Filesystem session.
//!
//! A session runs a handler table against one mount. It begins by
//! mounting (or adopting a custom transport) and ends when the
//! filesystem is unmounted, the session is closed programmatically, or
//! the process receives SIGINT/SIGTERM. While live, the dispatcher
//! receives, dispatches and replies to kernel requests.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;

use crate::abort::{AbortHandle, AbortReason, AbortSignal};
use crate::channel::{DevFuse, Transport};
use crate::dispatch::{Dispatcher, SessionOptions};
use crate::handlers::Handlers;
use crate::mnt::Mount;
use crate::mnt::mount_options::{MountOption, check_option_conflicts};
use crate::registry::HandleRegistry;

/// A mounted (or transport-backed) filesystem session.
pub struct Session<FS: Handlers> {
    dispatcher: Arc<Dispatcher<FS>>,
    mount: Option<Mount>,
    mountpoint: Option<PathBuf>,
}

impl<FS: Handlers> Session<FS> {
    /// Mounts `fs` on `mountpoint` and prepares a session reading from
    /// the FUSE device.
    ///
    /// Must be called within a tokio runtime; the device fd registers
    /// with the runtime's reactor.
    pub fn mount(
        fs: FS,
        mountpoint: &Path,
        options: &[MountOption],
        mut session_options: SessionOptions,
    ) -> io::Result<Session<FS>> {
        check_option_conflicts(options)?;
        ignore_sigpipe()?;
        session_options.debug = session_options.debug
            || options.contains(&MountOption::Debug)
            || fuse_debug_from_env();

        let (device, mount) = Mount::new(mountpoint, options)?;
        let mountpoint = mount.mountpoint().to_path_buf();
        let transport: Arc<dyn Transport> = Arc::new(DevFuse::new(device)?);
        Ok(Session {
            dispatcher: Dispatcher::new(Arc::new(fs), transport, session_options),
            mount: Some(mount),
            mountpoint: Some(mountpoint),
        })
    }

    /// A session over a caller-supplied transport. Nothing is mounted;
    /// the caller feeds request frames and consumes replies. This is
    /// how the dispatcher is driven in tests.
    pub fn with_transport(
        fs: FS,
        transport: Arc<dyn Transport>,
        session_options: SessionOptions,
    ) -> Session<FS> {
        Session {
            dispatcher: Dispatcher::new(Arc::new(fs), transport, session_options),
            mount: None,
            mountpoint: None,
        }
    }

    /// Where the filesystem is mounted, if it is.
    pub fn mountpoint(&self) -> Option<&Path> {
        self.mountpoint.as_deref()
    }

    /// A handle for closing the session from elsewhere.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session: self.dispatcher.session_handle(),
            signal: self.dispatcher.closed_signal(),
        }
    }

    /// The session's handle registry; exposes open-handle and
    /// lookup-count observations.
    pub fn registry(&self) -> Arc<HandleRegistry> {
        self.dispatcher.registry()
    }

    /// Runs the session until unmount, close or a fatal transport
    /// error. SIGINT and SIGTERM request graceful shutdown.
    pub async fn run(mut self) -> io::Result<()> {
        let handle = self.handle();
        let signal_task = tokio::spawn(async move {
            if let Err(err) = watch_termination_signals(&handle).await {
                error!("cannot install signal handlers: {err}");
                return;
            }
            handle.close();
        });

        let result = Arc::clone(&self.dispatcher).run().await;
        signal_task.abort();
        // Unmount before reporting the outcome.
        if let Some(mount) = self.mount.take() {
            info!(
                "unmounting {}",
                self.mountpoint.as_deref().unwrap_or(Path::new("?")).display()
            );
            drop(mount);
        }
        result
    }

    /// Runs the session in a background task and returns immediately.
    pub fn spawn(self) -> BackgroundSession {
        let mountpoint = self.mountpoint.clone();
        let handle = self.handle();
        let guard = tokio::spawn(self.run());
        BackgroundSession {
            mountpoint,
            handle,
            guard: Some(guard),
        }
    }
}

async fn watch_termination_signals(handle: &SessionHandle) -> io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => info!("SIGINT received, shutting down"),
        _ = terminate.recv() => info!("SIGTERM received, shutting down"),
        _ = handle.closed() => {}
    }
    Ok(())
}

/// Closes a running session from outside its task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<AbortHandle>,
    signal: AbortSignal,
}

impl SessionHandle {
    /// Requests graceful shutdown: in-flight requests are cancelled,
    /// drained under the grace period, then the transport closes.
    pub fn close(&self) {
        self.session.abort(AbortReason::Shutdown);
    }

    /// Resolves once shutdown has been requested.
    pub async fn closed(&self) {
        self.signal.fired().await;
    }
}

/// A session running in a background task. Dropping it requests
/// shutdown (and thereby unmount).
#[derive(Debug)]
pub struct BackgroundSession {
    /// Where the filesystem is mounted, if it is.
    pub mountpoint: Option<PathBuf>,
    handle: SessionHandle,
    guard: Option<JoinHandle<io::Result<()>>>,
}

impl BackgroundSession {
    /// Requests shutdown without waiting for it.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Requests shutdown and waits for the session to finish.
    pub async fn join(mut self) -> io::Result<()> {
        self.handle.close();
        let guard = self.guard.take().expect("guard taken at most once");
        match guard.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(io::Error::other(err)),
        }
    }
}

impl Drop for BackgroundSession {
    fn drop(&mut self) {
        self.handle.close();
    }
}

fn ignore_sigpipe() -> io::Result<()> {
    use nix::sys::signal::{SigHandler, Signal};
    // A kernel writer vanishing mid-reply must surface as EPIPE, not
    // kill the process.
    unsafe { nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .map(|_| ())
        .map_err(io::Error::from)
}

fn fuse_debug_from_env() -> bool {
    std::env::var("FUSE_DEBUG")
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}
