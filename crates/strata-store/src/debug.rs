//! Observational debug instrumentation.
//!
//! Flags are purely diagnostic: they gate `tracing::debug!` output for
//! dispatch timing, delta-build timing and the active subscriber count,
//! and have no behavioral effect on the store.

/// One diagnostic channel. The numeric codes match the store's public
/// configuration surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DebugFlag {
    /// Log how long each dispatch pass took and how many subscribers
    /// it delivered to.
    DispatchTiming = 1,
    /// Log how long each subscriber's delta took to build.
    DiffTiming = 2,
    /// Log the active subscriber count after subscribe/unsubscribe.
    SubscriberCount = 3,
}

impl DebugFlag {
    /// Resolve a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DebugFlag::DispatchTiming),
            2 => Some(DebugFlag::DiffTiming),
            3 => Some(DebugFlag::SubscriberCount),
            _ => None,
        }
    }

    /// The numeric code of this flag.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// The set of enabled diagnostic channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebugFlags {
    dispatch_timing: bool,
    diff_timing: bool,
    subscriber_count: bool,
}

impl DebugFlags {
    /// No diagnostics enabled.
    #[inline]
    pub fn none() -> Self {
        Self::default()
    }

    /// Enable one flag (builder style).
    pub fn with(mut self, flag: DebugFlag) -> Self {
        match flag {
            DebugFlag::DispatchTiming => self.dispatch_timing = true,
            DebugFlag::DiffTiming => self.diff_timing = true,
            DebugFlag::SubscriberCount => self.subscriber_count = true,
        }
        self
    }

    /// True when the flag is enabled.
    pub fn contains(&self, flag: DebugFlag) -> bool {
        match flag {
            DebugFlag::DispatchTiming => self.dispatch_timing,
            DebugFlag::DiffTiming => self.diff_timing,
            DebugFlag::SubscriberCount => self.subscriber_count,
        }
    }

    /// Build a set from numeric codes; unknown codes are logged and
    /// ignored.
    pub fn from_codes<I: IntoIterator<Item = u8>>(codes: I) -> Self {
        let mut flags = Self::none();
        for code in codes {
            match DebugFlag::from_code(code) {
                Some(flag) => flags = flags.with(flag),
                None => tracing::warn!(code = u64::from(code), "unknown debug flag code ignored"),
            }
        }
        flags
    }
}

impl FromIterator<DebugFlag> for DebugFlags {
    fn from_iter<I: IntoIterator<Item = DebugFlag>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), Self::with)
    }
}
