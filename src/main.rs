mod actions;
mod calibrate;
mod cli;
mod config;
mod detector;
mod gestures;
mod ipc;
mod logging;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
