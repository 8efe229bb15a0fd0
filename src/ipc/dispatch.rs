use crate::actions::UinputSink;
use crate::config::Profile;
use crate::gestures::Direction;
use anyhow::{Result, anyhow};
use log::warn;
use std::sync::{Arc, Mutex};

/// Forward one fired direction to the key-press sink, honoring the active
/// profile's `direction.*` bindings. An unbound direction falls back to its
/// arrow key; `none` disables it.
pub fn dispatch_direction(
    d: Direction,
    profile_arc: &Arc<Mutex<Profile>>,
    sink: &mut UinputSink,
) -> Result<()> {
    let (allow_commands, action) = {
        let p = profile_arc.lock().unwrap();
        (
            p.meta.allow_commands,
            p.bindings.get(d.binding_key()).cloned(),
        )
    };

    let Some(action) = action else {
        return sink.press_direction(d);
    };

    if action == "none" {
        return Ok(());
    }
    if let Some(rest) = action.strip_prefix("key:") {
        return sink.key_chord(rest.trim());
    }
    if let Some(rest) = action.strip_prefix("cmd:") {
        if !allow_commands {
            // validation rejects this at load; re-checked here in case the
            // profile was swapped mid-flight
            warn!("ignoring cmd binding for {}: allow_commands=false", d.as_str());
            return Ok(());
        }
        std::process::Command::new("sh")
            .arg("-c")
            .arg(rest.trim())
            .spawn()?;
        return Ok(());
    }

    Err(anyhow!(
        "unknown action mapping for {} -> '{}'",
        d.binding_key(),
        action
    ))
}
