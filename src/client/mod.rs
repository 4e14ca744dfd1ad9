//! Participant-side clients: lock-step follower, timed-pool racers, and the
//! countdown reconstruction both rely on.

pub mod countdown;
pub mod lockstep;
pub mod pool;

pub use countdown::{pool_remaining_ms, LockstepCountdown};
pub use lockstep::{LockstepPlayer, PlayerView};
pub use pool::{session_complete, standings, PoolClient, PoolHost, PoolHostHandle};
