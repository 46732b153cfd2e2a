use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(DoseStatus {
    Pending => "pending",
    Snoozed => "snoozed",
    OnTime => "on_time",
    Late => "late",
    Missed => "missed",
    Skipped => "skipped",
});

impl DoseStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::OnTime | Self::Late | Self::Missed | Self::Skipped)
    }

    /// Statuses that count toward the adherence-rate numerator.
    pub fn counts_as_taken(&self) -> bool {
        matches!(self, Self::OnTime | Self::Late)
    }
}

str_enum!(Daypart {
    Morning => "morning",
    Noon => "noon",
    Afternoon => "afternoon",
    Evening => "evening",
    Night => "night",
});

str_enum!(ReminderMode {
    Silent => "silent",
    Voice => "voice",
});

str_enum!(CreatorRole {
    Patient => "patient",
    Relative => "relative",
});

str_enum!(AlertKind {
    LowStock => "low_stock",
    DoseMissed => "dose_missed",
});
