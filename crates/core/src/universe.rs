//! Fixed-size DMX512 frame buffer.
//!
//! A universe is the start code followed by 512 channel slots. Channels are
//! addressed 1-based, matching the addresses printed on fixtures.

pub const START_CODE: u8 = 0x00;
pub const CHANNEL_COUNT: usize = 512;
pub const UNIVERSE_SIZE: usize = CHANNEL_COUNT + 1;
pub const CHANNEL_MIN: u16 = 1;
pub const CHANNEL_MAX: u16 = CHANNEL_COUNT as u16;

/// Create a zeroed 513-byte frame with the start code in slot 0.
pub fn create_buffer() -> Universe {
    Universe::new()
}

pub fn is_valid_channel(channel: u16) -> bool {
    (CHANNEL_MIN..=CHANNEL_MAX).contains(&channel)
}

/// The 512 channel slots without the start code, as sent over Art-Net.
pub fn extract_payload(universe: &Universe) -> &[u8] {
    &universe.data[1..]
}

/// Convert a requested channel value to a byte. Non-finite values yield `None`.
pub fn clamp_value(value: f64) -> Option<u8> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 255.0) as u8)
}

#[derive(Clone, PartialEq, Eq)]
pub struct Universe {
    data: [u8; UNIVERSE_SIZE],
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl Universe {
    pub fn new() -> Self {
        let mut data = [0u8; UNIVERSE_SIZE];
        data[0] = START_CODE;
        Universe { data }
    }

    pub fn get(&self, channel: u16) -> u8 {
        if is_valid_channel(channel) {
            self.data[channel as usize]
        } else {
            0
        }
    }

    /// Write a channel. Returns false and leaves the buffer untouched for invalid channels.
    pub fn set(&mut self, channel: u16, value: u8) -> bool {
        if !is_valid_channel(channel) {
            return false;
        }
        self.data[channel as usize] = value;
        true
    }

    /// Write a float request, clamped to 0..=255. Non-finite values are dropped.
    pub fn set_clamped(&mut self, channel: u16, value: f64) -> bool {
        match clamp_value(value) {
            Some(v) => self.set(channel, v),
            None => false,
        }
    }

    /// Zero every channel slot. The start code is preserved.
    pub fn clear(&mut self) {
        self.data[1..].fill(0);
    }

    pub fn is_blackout(&self) -> bool {
        self.data[1..].iter().all(|&v| v == 0)
    }

    pub fn as_bytes(&self) -> &[u8; UNIVERSE_SIZE] {
        &self.data
    }

    pub fn payload(&self) -> &[u8] {
        extract_payload(self)
    }

    /// Iterate `(channel, value)` pairs over the 512 slots.
    pub fn channels(&self) -> impl Iterator<Item = (u16, u8)> + '_ {
        self.data[1..]
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as u16 + 1, v))
    }
}

impl std::fmt::Debug for Universe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.data[1..].iter().filter(|&&v| v != 0).count();
        f.debug_struct("Universe")
            .field("start_code", &self.data[0])
            .field("active_channels", &active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_has_start_code_and_512_slots() {
        let buffer = create_buffer();
        assert_eq!(buffer.as_bytes().len(), UNIVERSE_SIZE);
        assert_eq!(buffer.as_bytes()[0], START_CODE);
    }

    #[test]
    fn payload_of_new_buffer_is_all_zero() {
        let buffer = create_buffer();
        let payload = extract_payload(&buffer);
        assert_eq!(payload.len(), CHANNEL_COUNT);
        assert!(payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn channel_validation_bounds() {
        assert!(!is_valid_channel(0));
        assert!(is_valid_channel(1));
        assert!(is_valid_channel(512));
        assert!(!is_valid_channel(513));
    }

    #[test]
    fn set_ignores_invalid_channels() {
        let mut buffer = create_buffer();
        assert!(!buffer.set(0, 99));
        assert!(!buffer.set(513, 99));
        assert_eq!(buffer.as_bytes()[0], START_CODE);
        assert!(buffer.is_blackout());
    }

    #[test]
    fn set_clamped_drops_non_finite_values() {
        let mut buffer = create_buffer();
        buffer.set(10, 42);
        assert!(!buffer.set_clamped(10, f64::NAN));
        assert!(!buffer.set_clamped(10, f64::INFINITY));
        assert!(!buffer.set_clamped(10, f64::NEG_INFINITY));
        assert_eq!(buffer.get(10), 42);

        buffer.set_clamped(11, 300.0);
        buffer.set_clamped(12, -5.0);
        buffer.set_clamped(13, 127.9);
        assert_eq!(buffer.get(11), 255);
        assert_eq!(buffer.get(12), 0);
        assert_eq!(buffer.get(13), 127);
    }

    #[test]
    fn payload_maps_channel_one_to_index_zero() {
        let mut buffer = create_buffer();
        buffer.set(1, 10);
        buffer.set(512, 20);
        let payload = buffer.payload();
        assert_eq!(payload[0], 10);
        assert_eq!(payload[511], 20);
    }

    #[test]
    fn clear_preserves_start_code() {
        let mut buffer = create_buffer();
        buffer.set(5, 255);
        buffer.clear();
        assert!(buffer.is_blackout());
        assert_eq!(buffer.as_bytes()[0], START_CODE);
    }
}
