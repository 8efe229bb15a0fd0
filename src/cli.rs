use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, process::Command};

use crate::ipc;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("handctl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => {
            let r = ipc::client_request(serde_json::json!({"op":"shutdown"}))?;
            print_response(&r);
            Ok(())
        }

        Some("status") => {
            let r = ipc::client_request(serde_json::json!({"op":"status"}))?;
            print_response(&r);
            Ok(())
        }

        Some("reload") => {
            let r = ipc::client_request(serde_json::json!({"op":"reload"}))?;
            print_response(&r);
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some("list") => {
            let r = ipc::client_request(serde_json::json!({"op":"list"}))?;
            print_response(&r);
            Ok(())
        }

        Some("doctor") => {
            let r = ipc::client_request(serde_json::json!({"op":"doctor"}))?;
            print_response(&r);
            Ok(())
        }

        Some("recalibrate") => {
            let r = ipc::client_request(serde_json::json!({"op":"recalibrate"}))?;
            print_response(&r);
            Ok(())
        }

        Some("sensitivity") => {
            // usage: handctl sensitivity <up|down>
            let dir: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl sensitivity <up|down>"))?;
            if dir != "up" && dir != "down" {
                return Err(anyhow!("usage: handctl sensitivity <up|down>"));
            }
            let r = ipc::client_request(serde_json::json!({"op":"sensitivity","dir":dir}))?;
            print_response(&r);
            Ok(())
        }

        Some("emit") => {
            // usage: handctl emit key UP
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit key <chord>"))?;
            let mut sink = crate::actions::UinputSink::new()?;
            match what.as_str() {
                "key" => {
                    let chord: String = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: handctl emit key UP"))?;
                    sink.key_chord(&chord)?;
                    println!("ok: sent key chord {chord}");
                }
                other => return Err(anyhow!("unknown emit kind: {other}")),
            }
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!(
        r#"handctl — hand-gesture direction controller

Tracks your index fingertip through a MediaPipe helper and turns hand
movement away from a calibrated rest position into arrow-key presses.

USAGE:
  handctl help [command]            Show general or command-specific help
  handctl start                     Start the daemon (calibrates on launch)
  handctl stop                      Stop the daemon
  handctl status                    Show calibration/direction state
  handctl reload                    Reload active profile
  handctl use <name>                Switch active profile
  handctl list                      List profiles
  handctl doctor                    Diagnose uinput/detector setup
  handctl recalibrate               Re-learn the rest position
  handctl sensitivity <up|down>     Adjust the direction threshold
  handctl emit key UP               Emit a key or chord manually

TIPS:
  - Profiles: ~/.config/handctl/profiles
  - Detector helper: ~/.config/handctl/hand_detect.py
  - Hold your hand still for the first ~30 frames after start/recalibrate
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: handctl start\nStarts the background daemon and the detector helper."),
        "stop" => println!("usage: handctl stop\nStops the running daemon."),
        "status" => println!(
            "usage: handctl status\nShows calibration progress, current direction, threshold, fire count."
        ),
        "reload" => println!(
            "usage: handctl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: handctl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => {
            println!("usage: handctl list\nLists available profiles.")
        }
        "doctor" => println!(
            "usage: handctl doctor\nChecks uinput permissions and the detector helper install."
        ),
        "recalibrate" => println!(
            "usage: handctl recalibrate\nDrops the baseline and re-learns the rest position."
        ),
        "sensitivity" => println!(
            "usage: handctl sensitivity <up|down>\nup lowers the pixel threshold (floor 5), down raises it."
        ),
        "emit" => println!("usage: handctl emit key <chord>\nExample: handctl emit key CTRL+RIGHT"),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
