use anyhow::Result;
use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    sync::atomic::{AtomicBool, Ordering},
    sync::mpsc::{Receiver, Sender, channel},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use super::pipeline::{PipelineControl, PipelineStatus, run_pipeline};
use super::runtime::socket_path;
use crate::config::{DaemonConfigState, Profile};

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut state = DaemonState::new()?;
    info!("daemon: active profile '{}'", state.cfg.active_name);

    // cooperative quit, checked once per loop
    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, stop.clone())?;
    signal_hook::flag::register(SIGINT, stop.clone())?;

    // channels
    let (tx_req, rx_req) = channel::<IpcMsg>();

    // frame pipeline thread
    let mut pipeline = PipelineThread::start(
        state.cfg.profile.clone(),
        state.cfg.detector_script.clone(),
        stop.clone(),
    );

    // accept loop
    listener.set_nonblocking(true)?;
    while !stop.load(Ordering::Relaxed) {
        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let st_snapshot = state.clone_shallow();
            let handle = pipeline.handle();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, st_snapshot, tx, handle) {
                    error!("ipc client error: {e}");
                }
            });
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => {
                    if let Err(e) = state.cfg.reload() {
                        error!("reload failed: {e}");
                    } else {
                        pipeline.update_profile(state.cfg.profile.clone());
                        info!("profile reloaded");
                    }
                }
                IpcMsg::UseProfile(name) => {
                    if let Err(e) = state.cfg.set_active(&name) {
                        error!("use profile failed: {e}");
                    } else {
                        pipeline.update_profile(state.cfg.profile.clone());
                        info!("switched active profile to {}", state.cfg.active_name);
                    }
                }
                IpcMsg::Shutdown => {
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }

    info!("daemon: shutting down");
    let _ = std::fs::remove_file(&sock);
    Ok(())
}

fn handle_client(
    mut stream: UnixStream,
    st: DaemonState,
    tx_req: Sender<IpcMsg>,
    pipeline: PipelineHandle,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match op {
        "status" => {
            let pipe = pipeline.status.lock().unwrap().clone();
            serde_json::json!({"ok": true, "data": {
                "active_profile": st.cfg.active_name,
                "socket": super::runtime::socket_path(),
                "pipeline": pipe,
            }})
        }
        "reload" => {
            let _ = tx_req.send(IpcMsg::Reload);
            serde_json::json!({"ok": true, "data": {"active_profile": st.cfg.active_name}})
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let _ = tx_req.send(IpcMsg::UseProfile(name.to_string()));
            serde_json::json!({"ok": true, "data": {"active_profile": name}})
        }
        "list" => {
            let list = st.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        "doctor" => {
            let report = st.cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "recalibrate" => {
            let _ = pipeline.tx_ctl.send(PipelineControl::Recalibrate);
            serde_json::json!({"ok": true, "data": "recalibrating"})
        }
        "sensitivity" => {
            let dir = req.get("dir").and_then(|v| v.as_str()).unwrap_or("");
            let mut p = pipeline.profile.lock().unwrap();
            let threshold = match dir {
                "up" => p.thresholds.increase_sensitivity(),
                "down" => p.thresholds.decrease_sensitivity(),
                other => {
                    let err = serde_json::json!({"ok": false, "error": format!("unknown sensitivity dir: {other}")});
                    write!(stream, "{}\n", err)?;
                    return Ok(());
                }
            };
            serde_json::json!({"ok": true, "data": {"direction_threshold": threshold}})
        }
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    write!(stream, "{}\n", resp)?;
    Ok(())
}

struct DaemonState {
    pub cfg: DaemonConfigState,
}

impl DaemonState {
    fn new() -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        Ok(Self { cfg })
    }
    fn clone_shallow(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
        }
    }
}

enum IpcMsg {
    Reload,
    UseProfile(String),
    Shutdown,
}

/// Everything a client handler needs to reach the running pipeline.
#[derive(Clone)]
struct PipelineHandle {
    profile: Arc<Mutex<Profile>>,
    status: Arc<Mutex<PipelineStatus>>,
    tx_ctl: Sender<PipelineControl>,
}

struct PipelineThread {
    profile: Arc<Mutex<Profile>>,
    status: Arc<Mutex<PipelineStatus>>,
    tx_ctl: Sender<PipelineControl>,
    _thread: thread::JoinHandle<()>,
}

impl PipelineThread {
    fn start(
        profile: Profile,
        detector_script: std::path::PathBuf,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let profile_arc = Arc::new(Mutex::new(profile));
        let status_arc = Arc::new(Mutex::new(PipelineStatus::default()));
        let (tx_ctl, rx_ctl): (Sender<PipelineControl>, Receiver<PipelineControl>) = channel();

        let prof_clone = profile_arc.clone();
        let status_clone = status_arc.clone();
        let handle = thread::spawn(move || {
            if let Err(e) = run_pipeline(prof_clone, status_clone, rx_ctl, stop, detector_script) {
                error!("frame pipeline failed: {e}");
            }
        });
        Self {
            profile: profile_arc,
            status: status_arc,
            tx_ctl,
            _thread: handle,
        }
    }

    fn update_profile(&mut self, new_profile: Profile) {
        if let Ok(mut p) = self.profile.lock() {
            *p = new_profile;
        }
    }

    fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            profile: self.profile.clone(),
            status: self.status.clone(),
            tx_ctl: self.tx_ctl.clone(),
        }
    }
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path();
    if !sock.exists() {
        return Err(anyhow::anyhow!(
            "handctl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}
