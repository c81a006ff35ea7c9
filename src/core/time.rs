use std::sync::{Arc, RwLock};

use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime, PrimitiveDateTime};

/// Wall-clock seam. Production code runs on the system clock; tests pin a
/// fixed instant and advance it by hand.
#[derive(Clone)]
pub(crate) struct Clock {
    fixed: Option<Arc<RwLock<OffsetDateTime>>>,
}

impl Clock {
    pub(crate) fn system() -> Self {
        Self { fixed: None }
    }

    pub(crate) fn fixed(at: OffsetDateTime) -> Self {
        Self { fixed: Some(Arc::new(RwLock::new(at))) }
    }

    pub(crate) fn now_utc(&self) -> OffsetDateTime {
        match &self.fixed {
            Some(instant) => *instant.read().unwrap_or_else(|poisoned| poisoned.into_inner()),
            None => OffsetDateTime::now_utc(),
        }
    }

    pub(crate) fn now_primitive(&self) -> PrimitiveDateTime {
        let now = self.now_utc();
        PrimitiveDateTime::new(now.date(), now.time())
    }

    /// Moves a fixed clock forward; a no-op on the system clock.
    pub(crate) fn advance(&self, by: Duration) {
        if let Some(instant) = &self.fixed {
            let mut guard = instant.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard += by;
        }
    }
}

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Time};

    #[test]
    fn format_primitive_outputs_utc_z() {
        let date = Date::from_calendar_date(2025, time::Month::January, 2).unwrap();
        let time = Time::from_hms(10, 20, 30).unwrap();
        let value = PrimitiveDateTime::new(date, time);
        assert_eq!(format_primitive(value), "2025-01-02T10:20:30Z");
    }

    #[test]
    fn fixed_clock_advances_only_by_hand() {
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let clock = Clock::fixed(start);
        assert_eq!(clock.now_utc(), start);

        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now_utc(), start + Duration::minutes(90));
    }

    #[test]
    fn system_clock_ignores_advance() {
        let clock = Clock::system();
        let before = OffsetDateTime::now_utc();
        clock.advance(Duration::hours(5));
        let now = clock.now_utc();
        assert!(now >= before);
        assert!(now < before + Duration::hours(1));
    }
}
