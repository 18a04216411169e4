use serde::{Deserialize, Serialize};

pub type PacketId = u64;

/// Reception outcome of a frame at one receiver.
///
/// `Received`, `Corrupted`, and `CorruptedByChannel` are terminal: once a
/// packet reaches one of them it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketState {
    /// Generated but not yet on the air at this receiver.
    Pending,
    /// The receiver locked onto this frame and is decoding it.
    Receiving,
    /// Decoded successfully.
    Received,
    /// Lost to a collision with an overlapping frame.
    Corrupted,
    /// Lost to distance-dependent channel noise.
    CorruptedByChannel,
}

impl PacketState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PacketState::Received | PacketState::Corrupted | PacketState::CorruptedByChannel
        )
    }
}

/// A transmission unit. Packets have value semantics: the channel hands an
/// independent clone to every neighbor of the transmitter, so the reception
/// outcome at one node never leaks into another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    id: PacketId,
    size: u32,
    duration: f64,
    state: PacketState,
    /// Probability that this copy is decoded correctly at its receiver.
    /// 1 under the disk model; 1 - (distance/range)^(1/3) under realistic
    /// propagation.
    pub correct_reception_probability: f64,
}

impl Packet {
    pub fn new(id: PacketId, size: u32, duration: f64) -> Self {
        Self {
            id,
            size,
            duration,
            state: PacketState::Pending,
            correct_reception_probability: 1.0,
        }
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    /// Size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Airtime in seconds: size * 8 / datarate.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn state(&self) -> PacketState {
        self.state
    }

    /// Terminal states are sticky. Re-marking the same terminal state is
    /// allowed: overlapping frames corrupt the current packet once per
    /// overlap.
    pub fn set_state(&mut self, next: PacketState) {
        assert!(
            !self.state.is_terminal() || next == self.state,
            "packet {}: illegal state change {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        self.state = next;
    }
}
