//! IdGenerator port - ID 生成の抽象化
//!
//! Event ids only need to be unique within the process, but ULIDs also sort
//! by creation time, which makes logs easier to follow.

use crate::domain::EventId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は event id を生成
///
/// `Send + Sync`: dispatch can happen on any thread.
pub trait IdGenerator: Send + Sync {
    fn generate_event_id(&self) -> EventId;
}

/// ULID ベースの生成器。Clock を差し替えると timestamp 部分が決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_event_id(&self) -> EventId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        EventId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_event_id();
        let id2 = id_gen.generate_event_id();
        let id3 = id_gen.generate_event_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_is_deterministic() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_event_id();
        let id2 = id_gen.generate_event_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        // timestamp 部分は同じ
        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }
}
