use anyhow::{Result, anyhow};
use log::{info, warn};

use crate::gestures::Direction;

pub struct UinputSink {
    enabled: bool,
    #[allow(dead_code)]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                enabled: true,
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self {
                enabled: true,
                linux: None,
            })
        }
    }

    pub fn noop() -> Self {
        Self {
            enabled: true,
            linux: None,
        }
    }

    /// Tap the arrow key for a fired direction.
    pub fn press_direction(&mut self, d: Direction) -> Result<()> {
        self.key_chord(d.key_token())
    }

    /// Send a chord like "CTRL+RIGHT" or a single "UP"
    pub fn key_chord(&mut self, chord: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            let parts: Vec<_> = chord
                .split('+')
                .map(|s| s.trim().to_ascii_uppercase())
                .collect();
            let mut keys = Vec::with_capacity(parts.len());
            for p in parts {
                keys.push(map_key(&p)?);
            }
            // press in order
            for k in &keys {
                dev.key_send(*k, 1)?;
            }
            dev.sync()?;
            // release in reverse
            for k in keys.iter().rev() {
                dev.key_send(*k, 0)?;
            }
            dev.sync()?;
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn map_key(tok: &str) -> Result<uinput::event::keyboard::Key> {
    use uinput::event::keyboard::Key as K;
    let k = match tok {
        "UP" => K::Up,
        "DOWN" => K::Down,
        "LEFT" => K::Left,
        "RIGHT" => K::Right,
        "W" => K::W,
        "A" => K::A,
        "S" => K::S,
        "D" => K::D,
        "SPACE" => K::Space,
        "CTRL" | "CONTROL" => K::LeftControl,
        "ALT" => K::LeftAlt,
        "SHIFT" => K::LeftShift,
        "SUPER" | "META" | "WIN" => K::LeftMeta,
        other => return Err(anyhow!("unsupported key token: {other}")),
    };
    Ok(k)
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::keyboard::Key;

        let dev = uinput::default()?
            .name("Handctl Virtual Keyboard")?
            // arrows for the four directions
            .event(Key::Up)?
            .event(Key::Down)?
            .event(Key::Left)?
            .event(Key::Right)?
            // WASD-style rebinds
            .event(Key::W)?
            .event(Key::A)?
            .event(Key::S)?
            .event(Key::D)?
            .event(Key::Space)?
            // modifiers for chord bindings
            .event(Key::LeftControl)?
            .event(Key::LeftAlt)?
            .event(Key::LeftShift)?
            .event(Key::LeftMeta)?
            .create()?;

        info!("uinput: created virtual keyboard");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn key_send(&mut self, key: uinput::event::keyboard::Key, val: i32) -> Result<()> {
        self.dev.send(key, val)?;
        Ok(())
    }
}
