//! Media player control over the MPRIS D-Bus interface.

use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info};

const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

/// Something that can pause every media player in the session.
pub trait PlayerControl: Send + Sync {
    /// Ask every player to pause. Returns how many were asked.
    fn pause_all(&self) -> Result<usize>;
}

pub fn is_mpris_player(bus_name: &str) -> bool {
    bus_name.len() > MPRIS_PREFIX.len() && bus_name.starts_with(MPRIS_PREFIX)
}

/// Players on the user's session bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct MprisPlayers;

impl PlayerControl for MprisPlayers {
    fn pause_all(&self) -> Result<usize> {
        let conn = zbus::blocking::Connection::session()
            .context("Failed to connect to the session bus")?;
        let names = zbus::blocking::fdo::DBusProxy::new(&conn)?
            .list_names()
            .context("Failed to list bus names")?;

        let players: Vec<String> = names
            .iter()
            .map(|name| name.to_string())
            .filter(|name| is_mpris_player(name))
            .collect();

        // One call per player, all in flight at once.
        thread::scope(|scope| {
            for player in &players {
                let conn = &conn;
                scope.spawn(move || {
                    let reply = conn.call_method(
                        Some(player.as_str()),
                        MPRIS_PATH,
                        Some(PLAYER_INTERFACE),
                        "Pause",
                        &(),
                    );
                    match reply {
                        Ok(_) => debug!("paused {}", player),
                        Err(e) => debug!("Failed to pause {}: {}", player, e),
                    }
                });
            }
        });

        info!("asked {} player(s) to pause", players.len());
        Ok(players.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mpris_player() {
        assert!(is_mpris_player("org.mpris.MediaPlayer2.spotify"));
        assert!(is_mpris_player("org.mpris.MediaPlayer2.firefox.instance_1_23"));
        assert!(!is_mpris_player("org.mpris.MediaPlayer2."));
        assert!(!is_mpris_player("org.freedesktop.Notifications"));
        assert!(!is_mpris_player(":1.42"));
    }
}
