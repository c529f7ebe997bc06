//! Reaction to a trigger: mute the sink while pausing players, wait, unmute.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pwmute::{MuteError, MuteSession};
use tracing::{debug, error, info, warn};

use crate::graph::Trigger;
use crate::players::PlayerControl;

/// Anything that can mute a node synchronously.
pub trait NodeMuter: Send + Sync {
    fn set_mute(&self, node_id: u32, mute: bool) -> Result<(), MuteError>;
}

impl NodeMuter for MuteSession {
    fn set_mute(&self, node_id: u32, mute: bool) -> Result<(), MuteError> {
        MuteSession::set_mute(self, node_id, mute)
    }
}

#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub unmute_delay: Duration,
    pub pause_players: bool,
}

impl GuardSettings {
    pub fn from_config(guard: &guardconf::GuardSection) -> Self {
        Self {
            unmute_delay: guard.unmute_delay(),
            pause_players: guard.pause_players,
        }
    }
}

#[derive(Clone)]
pub struct Guard {
    muter: Arc<dyn NodeMuter>,
    players: Arc<dyn PlayerControl>,
    settings: GuardSettings,
}

impl Guard {
    pub fn new(
        muter: Arc<dyn NodeMuter>,
        players: Arc<dyn PlayerControl>,
        settings: GuardSettings,
    ) -> Self {
        Self {
            muter,
            players,
            settings,
        }
    }

    /// Protect the trigger's node on a worker thread.
    pub fn handle(&self, trigger: Trigger) -> Option<JoinHandle<()>> {
        info!("{:?}: protecting node {}", trigger.reason, trigger.node_id);
        let guard = self.clone();
        thread::Builder::new()
            .name(format!("earguard-guard-{}", trigger.node_id))
            .spawn(move || guard.protect(trigger.node_id))
            .map_err(|e| error!("Failed to spawn guard thread: {}", e))
            .ok()
    }

    /// Mute `node_id` and pause players at the same time, hold for the
    /// unmute delay from the pause, then unmute.
    ///
    /// The unmute is sent only after the mute call has returned, so it can
    /// never be overtaken by it.
    pub fn protect(&self, node_id: u32) {
        thread::scope(|scope| {
            let muting = thread::Builder::new()
                .name(format!("earguard-mute-{}", node_id))
                .spawn_scoped(scope, || {
                    if let Err(e) = self.muter.set_mute(node_id, true) {
                        warn!("mute of node {} failed: {}", node_id, e);
                    }
                });
            if let Err(e) = muting {
                error!("Failed to spawn mute thread, muting inline: {}", e);
                if let Err(e) = self.muter.set_mute(node_id, true) {
                    warn!("mute of node {} failed: {}", node_id, e);
                }
            }

            if self.settings.pause_players {
                match self.players.pause_all() {
                    Ok(count) => debug!("paused {} player(s)", count),
                    Err(e) => error!("Failed to pause players: {:#}", e),
                }
            }

            thread::sleep(self.settings.unmute_delay);
        });

        // A timed-out mute can still land, so unmute unconditionally.
        match self.muter.set_mute(node_id, false) {
            Ok(()) => debug!("node {} unmuted", node_id),
            Err(e) => warn!("unmute of node {} failed: {}", node_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TriggerReason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingMuter {
        calls: Mutex<Vec<(u32, bool)>>,
        fail_mute: bool,
    }

    impl NodeMuter for RecordingMuter {
        fn set_mute(&self, node_id: u32, mute: bool) -> Result<(), MuteError> {
            self.calls.lock().unwrap().push((node_id, mute));
            if mute && self.fail_mute {
                return Err(MuteError::Timeout {
                    node_id,
                    timeout: Duration::from_secs(2),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingPlayers {
        pauses: AtomicUsize,
    }

    impl PlayerControl for CountingPlayers {
        fn pause_all(&self) -> anyhow::Result<usize> {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        }
    }

    struct SlowMuter {
        delay: Duration,
        calls: Mutex<Vec<(u32, bool, Instant)>>,
    }

    impl NodeMuter for SlowMuter {
        fn set_mute(&self, node_id: u32, mute: bool) -> Result<(), MuteError> {
            if mute {
                thread::sleep(self.delay);
            }
            self.calls.lock().unwrap().push((node_id, mute, Instant::now()));
            if mute {
                return Err(MuteError::Timeout {
                    node_id,
                    timeout: self.delay,
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct StampedPlayers {
        paused_at: Mutex<Option<Instant>>,
    }

    impl PlayerControl for StampedPlayers {
        fn pause_all(&self) -> anyhow::Result<usize> {
            *self.paused_at.lock().unwrap() = Some(Instant::now());
            Ok(1)
        }
    }

    fn settings(pause_players: bool) -> GuardSettings {
        GuardSettings {
            unmute_delay: Duration::from_millis(50),
            pause_players,
        }
    }

    #[test]
    fn test_protect_mutes_pauses_unmutes() {
        let muter = Arc::new(RecordingMuter::default());
        let players = Arc::new(CountingPlayers::default());
        let guard = Guard::new(muter.clone(), players.clone(), settings(true));

        let start = Instant::now();
        guard.protect(60);

        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(*muter.calls.lock().unwrap(), vec![(60, true), (60, false)]);
        assert_eq!(players.pauses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pause_players_disabled() {
        let muter = Arc::new(RecordingMuter::default());
        let players = Arc::new(CountingPlayers::default());
        let guard = Guard::new(muter.clone(), players.clone(), settings(false));

        guard.protect(60);
        assert_eq!(players.pauses.load(Ordering::SeqCst), 0);
        assert_eq!(muter.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_mute_still_unmutes() {
        let muter = Arc::new(RecordingMuter {
            fail_mute: true,
            ..Default::default()
        });
        let players = Arc::new(CountingPlayers::default());
        let guard = Guard::new(muter.clone(), players.clone(), settings(true));

        guard.protect(7);
        assert_eq!(*muter.calls.lock().unwrap(), vec![(7, true), (7, false)]);
        assert_eq!(players.pauses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slow_mute_does_not_delay_pause() {
        let muter = Arc::new(SlowMuter {
            delay: Duration::from_millis(600),
            calls: Mutex::new(Vec::new()),
        });
        let players = Arc::new(StampedPlayers::default());
        let guard = Guard::new(muter.clone(), players.clone(), settings(true));

        let start = Instant::now();
        guard.protect(60);

        let paused_at = players.paused_at.lock().unwrap().unwrap();
        assert!(paused_at.duration_since(start) < Duration::from_millis(200));

        let calls = muter.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].0, calls[0].1), (60, true));
        assert_eq!((calls[1].0, calls[1].1), (60, false));
        // unmute waits for the mute call to return
        assert!(calls[1].2.duration_since(start) >= Duration::from_millis(600));
    }

    #[test]
    fn test_unmute_delay_counts_from_pause() {
        let muter = Arc::new(RecordingMuter::default());
        let players = Arc::new(StampedPlayers::default());
        let guard = Guard::new(muter.clone(), players.clone(), settings(true));

        let start = Instant::now();
        guard.protect(60);
        let elapsed = start.elapsed();

        let paused_at = players.paused_at.lock().unwrap().unwrap();
        assert!(elapsed >= paused_at.duration_since(start) + Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_handle_runs_on_worker_thread() {
        let muter = Arc::new(RecordingMuter::default());
        let players = Arc::new(CountingPlayers::default());
        let guard = Guard::new(muter.clone(), players, settings(false));

        let handle = guard
            .handle(Trigger {
                node_id: 9,
                reason: TriggerReason::RouteChange,
            })
            .unwrap();
        handle.join().unwrap();
        assert_eq!(*muter.calls.lock().unwrap(), vec![(9, true), (9, false)]);
    }
}
