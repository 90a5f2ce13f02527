//! Extension host running in a child process, framed over its stdio.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exthost_rpc::{FramedTransport, MessagePassingProtocol};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::HostSettings;
use crate::error::HostError;
use crate::extensions::ExtensionHostExtensions;
use crate::handshake::{host_handshake, send_terminate};
use crate::host::{
    ExitEvent, ExtensionHost, ExtensionHostKind, ExtensionHostStartup, ExtensionRunningLocation,
};

#[derive(Debug, Clone)]
pub struct ProcessHostOptions {
    pub program: String,
    pub args: Vec<String>,
    /// Sent to the host with the `init` handshake message.
    pub init_data: Value,
    pub startup_warning: Duration,
    pub handshake_timeout: Duration,
    pub terminate_grace: Duration,
}

impl ProcessHostOptions {
    pub fn new(program: impl Into<String>, args: Vec<String>, settings: &HostSettings) -> Self {
        Self {
            program: program.into(),
            args,
            init_data: Value::Null,
            startup_warning: settings.startup_warning,
            handshake_timeout: settings.handshake_timeout,
            terminate_grace: settings.terminate_grace,
        }
    }
}

#[derive(Default)]
struct ProcessState {
    transport: Option<Arc<FramedTransport>>,
    kill: Option<oneshot::Sender<()>>,
}

pub struct ProcessExtensionHost {
    location: ExtensionRunningLocation,
    startup: ExtensionHostStartup,
    options: ProcessHostOptions,
    extensions: Mutex<ExtensionHostExtensions>,
    state: Mutex<ProcessState>,
    started: AtomicBool,
    terminating: Arc<AtomicBool>,
    exit: Arc<watch::Sender<Option<ExitEvent>>>,
}

impl ProcessExtensionHost {
    pub fn new(startup: ExtensionHostStartup, affinity: u32, options: ProcessHostOptions) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            location: ExtensionRunningLocation::new(ExtensionHostKind::LocalProcess, affinity),
            startup,
            options,
            extensions: Mutex::new(ExtensionHostExtensions::new()),
            state: Mutex::new(ProcessState::default()),
            started: AtomicBool::new(false),
            terminating: Arc::new(AtomicBool::new(false)),
            exit: Arc::new(exit),
        }
    }

    fn spawn(&self) -> Result<Arc<FramedTransport>, HostError> {
        let mut child = Command::new(&self.options.program)
            .args(&self.options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| HostError::Spawn(format!("{}: {err}", self.options.program)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Spawn("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Spawn("child stdout unavailable".to_string()))?;
        info!(
            "spawned extension host process {} (pid {:?})",
            self.options.program,
            child.id()
        );

        let transport = Arc::new(FramedTransport::new(stdout, stdin));
        let (kill_tx, kill_rx) = oneshot::channel();
        let terminating = self.terminating.clone();
        let exit = self.exit.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(err) = child.kill().await {
                        debug!("failed to kill extension host: {err}");
                    }
                    child.wait().await
                }
            };
            match status {
                Ok(status) if !terminating.load(Ordering::SeqCst) => {
                    info!("extension host process exited: {status}");
                    exit.send_replace(Some(exit_event(status)));
                }
                Ok(_) => debug!("extension host process terminated"),
                Err(err) => warn!("failed to wait for extension host process: {err}"),
            }
        });

        let mut state = self.state.lock();
        state.transport = Some(transport.clone());
        state.kill = Some(kill_tx);
        Ok(transport)
    }

    /// Kills a child whose start failed. Its exit is not reported.
    fn kill_unstarted(&self) {
        self.terminating.store(true, Ordering::SeqCst);
        let kill = {
            let mut state = self.state.lock();
            state.transport = None;
            state.kill.take()
        };
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
    }
}

fn exit_event(status: ExitStatus) -> ExitEvent {
    ExitEvent {
        code: status.code().unwrap_or(-1),
        signal: exit_signal(status),
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|signal| signal.to_string())
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<String> {
    None
}

#[async_trait]
impl ExtensionHost for ProcessExtensionHost {
    fn running_location(&self) -> ExtensionRunningLocation {
        self.location
    }

    fn startup(&self) -> ExtensionHostStartup {
        self.startup
    }

    fn extensions(&self) -> &Mutex<ExtensionHostExtensions> {
        &self.extensions
    }

    async fn start(&self) -> Result<Arc<dyn MessagePassingProtocol>, HostError> {
        if self.terminating.load(Ordering::SeqCst) {
            return Err(HostError::Disposed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HostError::AlreadyStarted);
        }
        let transport = self.spawn()?;

        let result = {
            let handshake = host_handshake(
                transport.as_ref(),
                &self.options.init_data,
                self.options.handshake_timeout,
            );
            tokio::pin!(handshake);
            let warning = tokio::time::sleep(self.options.startup_warning);
            tokio::pin!(warning);
            let mut warned = false;
            loop {
                tokio::select! {
                    result = &mut handshake => break result,
                    () = &mut warning, if !warned => {
                        warned = true;
                        warn!(
                            "Extension host did not start in {} seconds, that might be a problem.",
                            self.options.startup_warning.as_secs()
                        );
                    }
                }
            }
        };
        if let Err(err) = result {
            warn!("extension host handshake failed: {err}");
            self.kill_unstarted();
            return Err(err);
        }
        Ok(transport)
    }

    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>> {
        self.exit.subscribe()
    }

    fn dispose(&self) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }
        let (transport, kill) = {
            let mut state = self.state.lock();
            (state.transport.take(), state.kill.take())
        };
        let Some(kill) = kill else {
            return;
        };
        if let Some(transport) = &transport {
            if let Err(err) = send_terminate(transport.as_ref()) {
                debug!("failed to send terminate: {err}");
            }
        }
        let grace = self.options.terminate_grace;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let _ = kill.send(());
            return;
        };
        runtime.spawn(async move {
            if let Some(transport) = &transport {
                transport.drain().await;
            }
            tokio::time::sleep(grace).await;
            let _ = kill.send(());
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    #[tokio::test]
    async fn failed_handshake_kills_the_child() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let pid_file = std::env::temp_dir().join(format!("exthost-silent-{stamp}.pid"));
        let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());
        let options = ProcessHostOptions {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            init_data: Value::Null,
            startup_warning: Duration::from_secs(10),
            handshake_timeout: Duration::from_millis(300),
            terminate_grace: Duration::from_secs(10),
        };
        let host = ProcessExtensionHost::new(ExtensionHostStartup::EagerAutoStart, 0, options);
        let mut exit = host.subscribe_exit();

        assert!(host.start().await.is_err());
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while alive(pid) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "extension host {pid} still running"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!exit.has_changed().unwrap());
        assert!(matches!(host.start().await, Err(HostError::Disposed)));
        let _ = std::fs::remove_file(&pid_file);
    }
}
