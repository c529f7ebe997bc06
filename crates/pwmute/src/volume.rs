//! Per-channel volume payload.

/// Width of the `channelVolumes` array sent with every request.
///
/// Always 8, whatever the node's real channel count; the server applies
/// the leading entries and ignores the rest.
pub const CHANNEL_COUNT: usize = 8;

pub(crate) const MUTED: f32 = 0.0;
pub(crate) const UNMUTED: f32 = 1.0;

/// Fixed-width volume vector, one scalar repeated on every channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelVolumes([f32; CHANNEL_COUNT]);

impl ChannelVolumes {
    pub fn uniform(volume: f32) -> Self {
        Self([volume; CHANNEL_COUNT])
    }

    pub fn for_mute(mute: bool) -> Self {
        Self::uniform(if mute { MUTED } else { UNMUTED })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn is_muted(&self) -> bool {
        self.0.iter().all(|v| *v == MUTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_is_all_zero() {
        let volumes = ChannelVolumes::for_mute(true);
        assert_eq!(volumes.as_slice().len(), CHANNEL_COUNT);
        assert!(volumes.as_slice().iter().all(|v| *v == 0.0));
        assert!(volumes.is_muted());
    }

    #[test]
    fn test_unmute_is_all_one() {
        let volumes = ChannelVolumes::for_mute(false);
        assert_eq!(volumes.as_slice(), &[1.0; 8]);
        assert!(!volumes.is_muted());
    }
}
