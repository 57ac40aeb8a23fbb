// src/clock.rs
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex};

/// Source of "now" for every date rule. Tests pin it with `Clock::fixed`.
#[derive(Clone, Debug)]
pub enum Clock {
    System,
    Fixed(Arc<Mutex<NaiveDateTime>>),
}

impl Clock {
    pub fn system() -> Self {
        Clock::System
    }

    pub fn fixed(at: NaiveDateTime) -> Self {
        Clock::Fixed(Arc::new(Mutex::new(at)))
    }

    /// Moves a fixed clock to `at`. No-op on the system clock.
    pub fn set(&self, at: NaiveDateTime) {
        if let Clock::Fixed(current) = self {
            match current.lock() {
                Ok(mut guard) => *guard = at,
                Err(poisoned) => *poisoned.into_inner() = at,
            }
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.set(self.now() + duration);
    }

    pub fn now(&self) -> NaiveDateTime {
        match self {
            Clock::System => Local::now().naive_local(),
            Clock::Fixed(current) => match current.lock() {
                Ok(guard) => *guard,
                Err(poisoned) => *poisoned.into_inner(),
            },
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::System
    }
}
